use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

const PROMPT_PREVIEW_CHARS: usize = 300;
const ERROR_PREVIEW_CHARS: usize = 300;

fn preview(text: &str, limit: usize) -> String {
    text.replace('\n', " ").chars().take(limit).collect()
}

/// Times one chat request from receipt to reply.
///
/// A timer dropped before [`RequestTimer::finish`] logs `status=cancelled`, which is
/// what a client disconnect mid-request looks like.
#[derive(Debug)]
pub struct RequestTimer {
    route: &'static str,
    model: String,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    finished: bool,
}

impl RequestTimer {
    pub fn start(route: &'static str, model: &str, prompt: &str, attachments: usize) -> Self {
        let timer = RequestTimer {
            route,
            model: model.to_string(),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            finished: false,
        };
        info!(
            target: TIMING_TARGET,
            "event=chat_received route={} model={} attachments={} received_at={} prompt={:?}",
            timer.route,
            timer.model,
            attachments,
            timer.started_at.to_rfc3339(),
            preview(prompt, PROMPT_PREVIEW_CHARS)
        );
        timer
    }

    fn emit(&self, status: &str, detail: &str) {
        info!(
            target: TIMING_TARGET,
            "event=chat_completed route={} model={} started_at={} completed_at={} duration_s={:.3} status={} detail={:?}",
            self.route,
            self.model,
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            status,
            detail
        );
    }

    /// Logs completion. Later calls are ignored.
    pub fn finish(&mut self, status: &str, detail: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.emit(status, &preview(detail.unwrap_or_default(), ERROR_PREVIEW_CHARS));
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.emit("cancelled", "");
        }
    }
}

/// Wraps one model call in `llm_request` / `llm_response` timing events.
pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_perf = Instant::now();
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339()
    );

    let result = call().await;

    let (status, detail) = match &result {
        Ok(_) => ("success", String::new()),
        Err(err) => ("error", preview(&err.to_string(), ERROR_PREVIEW_CHARS)),
    };
    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} detail={:?}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status,
        detail
    );

    result
}
