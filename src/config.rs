use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;

use crate::bridge::BridgeSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub server_host: String,
    pub server_port: u16,
    pub ai_api_key: String,
    pub ai_base_url: String,
    pub ai_model: String,
    pub ai_summary_model: String,
    pub ai_temperature: f32,
    pub skills_dir: PathBuf,
    pub base_skill_name: String,
    pub history_enabled: bool,
    pub history_path: PathBuf,
    pub history_context_limit: usize,
    pub summary_timeout_seconds: u64,
    pub unity_host: String,
    pub unity_exec_port: u16,
    pub unity_connect_attempts: usize,
    pub unity_connect_retry_ms: u64,
    pub unity_receive_timeout_seconds: u64,
    pub unity_response_max_bytes: usize,
    pub show_raw_response: bool,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn resolve_path(value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

impl Config {
    pub fn load() -> Result<Self> {
        let ai_base_url = env_string("AI_BASE_URL", "https://api.deepseek.com");
        if ai_base_url.trim().is_empty() {
            return Err(anyhow!("AI_BASE_URL cannot be empty"));
        }

        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            server_host: env_string("SERVER_HOST", "127.0.0.1"),
            server_port: env_u16("SERVER_PORT", 5000),
            ai_api_key: env_string("AI_API_KEY", "sk-placeholder"),
            ai_base_url,
            ai_model: env_string("AI_MODEL", "deepseek-coder"),
            ai_summary_model: env_string("AI_SUMMARY_MODEL", ""),
            ai_temperature: env_f32("AI_TEMPERATURE", 0.1),
            skills_dir: resolve_path(env_string("SKILLS_DIR", "Skills")),
            base_skill_name: env_string("BASE_SKILL_NAME", "unity").trim().to_string(),
            history_enabled: env_bool("HISTORY_ENABLED", true),
            history_path: resolve_path(env_string("HISTORY_PATH", "chat_history.json")),
            history_context_limit: env_usize("HISTORY_CONTEXT_LIMIT", 12),
            summary_timeout_seconds: env_u64("SUMMARY_TIMEOUT_SECONDS", 30),
            unity_host: env_string("UNITY_HOST", "127.0.0.1"),
            unity_exec_port: env_u16("UNITY_EXEC_PORT", 8081),
            unity_connect_attempts: env_usize("UNITY_CONNECT_ATTEMPTS", 3).max(1),
            unity_connect_retry_ms: env_u64("UNITY_CONNECT_RETRY_MS", 200),
            unity_receive_timeout_seconds: env_u64("UNITY_RECEIVE_TIMEOUT_SECONDS", 300),
            unity_response_max_bytes: env_usize("UNITY_RESPONSE_MAX_BYTES", 65536).max(1024),
            show_raw_response: env_bool("SHOW_RAW_RESPONSE", false),
        })
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            host: self.unity_host.clone(),
            port: self.unity_exec_port,
            connect_attempts: self.unity_connect_attempts,
            retry_delay: Duration::from_millis(self.unity_connect_retry_ms),
            receive_timeout: Duration::from_secs(self.unity_receive_timeout_seconds),
            response_max_bytes: self.unity_response_max_bytes,
        }
    }
}

pub const SKILL_SELECTOR_SYSTEM_PROMPT: &str = "You are a skill selector. Identify which skills are needed for the user request. Return a JSON list of skill names.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize one exchange between a developer and an editor automation assistant. Reply with a single line under 120 characters describing what was asked and what was done. No markdown, no quotes.";

pub const SUMMARY_FALLBACK: &str = "Summary unavailable.";

pub const NO_CODE_MESSAGE: &str = "No code generated.";
