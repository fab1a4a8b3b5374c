use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::CONFIG;

/// Target for request and model-call timing events; routed to its own log files.
pub const TIMING_TARGET: &str = "bridge.timing";

const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "axum::serve"];

/// Flush guards for the non-blocking file writers. Keep alive for the whole process.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Everything except timing events, with HTTP plumbing clamped to WARN.
fn server_filter(level: LevelFilter) -> Targets {
    NOISY_TARGETS.iter().fold(
        Targets::new()
            .with_default(level)
            .with_target(TIMING_TARGET, LevelFilter::OFF),
        |filter, target| filter.with_target(*target, LevelFilter::WARN.min(level)),
    )
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn daily_writer(dir: &Path, file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
    guards.push(guard);
    writer
}

/// Installs stdout plus daily-rolling text and JSON files under `logs/`:
/// `server.log`/`server.jsonl` for general output, `timing.log`/`timing.jsonl` for timing events.
pub fn init_logging() -> LoggingGuards {
    let logs_dir = Path::new("logs");
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let level = parse_log_level(&CONFIG.log_level);
    let mut guards = Vec::with_capacity(4);

    let server_text = daily_writer(logs_dir, "server.log", &mut guards);
    let server_json = daily_writer(logs_dir, "server.jsonl", &mut guards);
    let timing_text = daily_writer(logs_dir, "timing.log", &mut guards);
    let timing_json = daily_writer(logs_dir, "timing.jsonl", &mut guards);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(server_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(server_text)
                .with_ansi(false)
                .with_filter(server_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(server_json)
                .with_filter(server_filter(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(timing_text)
                .with_ansi(false)
                .with_filter(timing_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(timing_json)
                .with_filter(timing_filter()),
        )
        .init();

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(parse_log_level("verbose"), LevelFilter::INFO);
        assert_eq!(parse_log_level(" Warning "), LevelFilter::WARN);
        assert_eq!(parse_log_level("OFF"), LevelFilter::OFF);
    }

    #[test]
    fn timing_events_only_reach_timing_files() {
        let server = server_filter(LevelFilter::DEBUG);
        let timing = timing_filter();
        assert!(!server.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(timing.would_enable(TIMING_TARGET, &Level::INFO));
        assert!(!timing.would_enable("ai_skills_server::bridge", &Level::INFO));
        assert!(server.would_enable("ai_skills_server::bridge", &Level::DEBUG));
    }

    #[test]
    fn http_plumbing_is_clamped_to_warn() {
        let server = server_filter(LevelFilter::TRACE);
        assert!(!server.would_enable("hyper_util::client::legacy::pool", &Level::DEBUG));
        assert!(server.would_enable("reqwest::connect", &Level::WARN));
        let quiet = server_filter(LevelFilter::ERROR);
        assert!(!quiet.would_enable("reqwest", &Level::WARN));
    }
}
