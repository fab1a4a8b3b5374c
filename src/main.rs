use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::info;

mod bridge;
mod chat;
mod config;
mod history;
mod llm;
mod server;
mod skills;
mod state;
mod utils;

use bridge::UnityBridge;
use chat::{ChatService, ChatSettings};
use config::CONFIG;
use history::HistoryStore;
use skills::SkillIndex;
use state::AppState;
use utils::logging::init_logging;

#[derive(Debug, Clone, PartialEq)]
struct ServerArgs {
    host: String,
    port: u16,
    history_path: Option<PathBuf>,
}

fn usage() -> &'static str {
    "Usage: ai_skills_server [--port <n>] [--host <addr>] [--history <path>] [--no-history]"
}

/// Parses CLI flags on top of configured defaults. `Ok(None)` means help was requested.
fn parse_server_args(
    args: &[String],
    host: &str,
    port: u16,
    history_path: Option<PathBuf>,
) -> anyhow::Result<Option<ServerArgs>> {
    let mut parsed = ServerArgs {
        host: host.to_string(),
        port,
        history_path,
    };

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--port" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --port"))?;
                parsed.port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("Invalid --port value: {value}"))?;
            }
            "--host" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --host"))?;
                parsed.host = value.clone();
            }
            "--history" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --history"))?;
                parsed.history_path = Some(PathBuf::from(value));
            }
            "--no-history" => {
                parsed.history_path = None;
            }
            "--help" | "-h" => return Ok(None),
            other => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    Ok(Some(parsed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let default_history = CONFIG
        .history_enabled
        .then(|| CONFIG.history_path.clone());
    let Some(server_args) =
        parse_server_args(&args, &CONFIG.server_host, CONFIG.server_port, default_history)?
    else {
        println!("{}", usage());
        return Ok(());
    };

    let skills = Arc::new(SkillIndex::new(CONFIG.skills_dir.clone()));
    let indexed = skills.scan();
    info!(
        "Skill index at {} holds {} skill(s)",
        skills.skills_dir().display(),
        indexed
    );

    let history = server_args
        .history_path
        .as_ref()
        .map(|path| Arc::new(HistoryStore::open(path.clone())));
    match &history {
        Some(store) => info!("Conversation history stored at {}", store.path().display()),
        None => info!("Conversation history disabled"),
    }

    let bridge = Arc::new(UnityBridge::new(CONFIG.bridge_settings()));
    let chat = ChatService::new(skills, history, bridge, ChatSettings::from_config(&CONFIG));

    server::serve(AppState::new(chat), &server_args.host, server_args.port).await
}
