use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::chat::{ChatRequest, ChatResponse};
use crate::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const HISTORY_DISABLED: &str = "History is disabled";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/shutdown", get(shutdown).post(shutdown))
        .route("/health", get(health))
        .route("/history", get(export_history))
        .route("/history/import", post(import_history))
        .route("/history/clear", post(clear_history))
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let bind_addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {bind_addr}"))?;
    info!("Starting AI server on {}", bind_addr);
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<()> {
    let notify = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("Failed to listen for Ctrl+C: {}", err);
                        std::future::pending::<()>().await;
                    }
                    info!("Ctrl+C received, shutting down");
                }
                _ = notify.notified() => {
                    info!("Shutdown requested over HTTP");
                }
            }
        })
        .await
        .context("server exited")?;
    info!("Server stopped");
    Ok(())
}

fn history_disabled() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": "error", "message": HISTORY_DISABLED})),
    )
}

/// POST /chat runs one full prompt cycle.
async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Json<ChatResponse> {
    Json(state.chat.handle(request).await)
}

/// GET|POST /shutdown answers first, then stops the server after a short grace period.
async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    let notify = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        notify.notify_one();
    });
    Json(json!({"status": "shutdown"}))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let history_entries = state.chat.history().map(|history| history.len());
    let skills = state.chat.skills();
    Json(json!({
        "status": "ok",
        "skills": skills.len(),
        "skill_names": skills.names(),
        "history_entries": history_entries,
    }))
}

async fn export_history(State(state): State<AppState>) -> Response {
    let Some(history) = state.chat.history() else {
        return history_disabled().into_response();
    };
    (
        [(header::CONTENT_TYPE, "application/json")],
        history.export_json(),
    )
        .into_response()
}

/// POST /history/import replaces the log with the posted JSON array.
async fn import_history(State(state): State<AppState>, body: String) -> (StatusCode, Json<Value>) {
    let Some(history) = state.chat.history() else {
        return history_disabled();
    };
    match history.import_json(&body) {
        Ok(imported) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "imported": imported})),
        ),
        Err(err) => {
            warn!("History import rejected: {}", err);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": err.to_string()})),
            )
        }
    }
}

async fn clear_history(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(history) = state.chat.history() else {
        return history_disabled();
    };
    if history.is_empty() {
        debug!("History clear requested on an empty log");
    }
    history.clear();
    info!("History cleared");
    (StatusCode::OK, Json(json!({"status": "ok"})))
}
