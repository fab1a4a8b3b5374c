use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Terminal report relayed from the editor. `data` carries raw JSON sent via `SendResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ExecutionResult {
            status: ExecutionStatus::Ok,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ExecutionResult {
            status: ExecutionStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub host: String,
    pub port: u16,
    pub connect_attempts: usize,
    pub retry_delay: Duration,
    pub receive_timeout: Duration,
    pub response_max_bytes: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            host: "127.0.0.1".to_string(),
            port: 8081,
            connect_attempts: 3,
            retry_delay: Duration::from_millis(200),
            receive_timeout: Duration::from_secs(300),
            response_max_bytes: 64 * 1024,
        }
    }
}
