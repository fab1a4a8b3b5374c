use std::io::ErrorKind;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::bridge::harness::Harness;
use crate::bridge::types::{BridgeSettings, ExecutionResult};
use crate::bridge::CodeExecutor;

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Cannot connect to Unity port {port}.")]
    Unreachable { port: u16 },
    #[error("Connect Error: {0}")]
    Connect(#[source] std::io::Error),
    #[error("Comm Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Comm Error: no response within {0:?}")]
    Timeout(Duration),
    #[error("Empty response")]
    EmptyResponse,
    #[error("Comm Error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyProgress {
    Complete,
    Incomplete,
    Invalid,
}

/// Only an error at end of input means more bytes may still fix the reply.
fn reply_progress(buffer: &[u8]) -> ReplyProgress {
    match serde_json::Deserializer::from_slice(buffer)
        .into_iter::<serde_json::Value>()
        .next()
    {
        Some(Ok(_)) => ReplyProgress::Complete,
        Some(Err(err)) if !err.is_eof() => ReplyProgress::Invalid,
        _ => ReplyProgress::Incomplete,
    }
}

/// First JSON object wins; anything after it (a late second report) is ignored.
fn decode_result(buffer: &[u8]) -> Result<ExecutionResult, BridgeError> {
    let text = String::from_utf8_lossy(buffer);
    if text.trim().is_empty() {
        return Err(BridgeError::EmptyResponse);
    }
    match serde_json::Deserializer::from_str(&text)
        .into_iter::<ExecutionResult>()
        .next()
    {
        Some(Ok(result)) => Ok(result),
        Some(Err(err)) => Err(BridgeError::Decode(err)),
        None => Err(BridgeError::EmptyResponse),
    }
}

/// Ships harness-wrapped code to the editor's execution socket: one write, one reply.
#[derive(Debug, Clone)]
pub struct UnityBridge {
    settings: BridgeSettings,
    harness: Harness,
}

impl UnityBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        UnityBridge {
            settings,
            harness: Harness::default(),
        }
    }

    async fn connect(&self) -> Result<TcpStream, BridgeError> {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        let attempts = self.settings.connect_attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(&address))
                .await
                .unwrap_or_else(|_| Err(std::io::Error::from(ErrorKind::TimedOut)));
            match outcome {
                Ok(stream) => return Ok(stream),
                Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                    debug!(
                        "Connection to {} refused (attempt {}/{})",
                        address, attempt, attempts
                    );
                    if attempt < attempts {
                        sleep(self.settings.retry_delay).await;
                    }
                }
                Err(err) => return Err(BridgeError::Connect(err)),
            }
        }
        Err(BridgeError::Unreachable {
            port: self.settings.port,
        })
    }

    async fn read_response(&self, stream: &mut TcpStream) -> Result<Vec<u8>, BridgeError> {
        let cap = self.settings.response_max_bytes.max(1);
        let limit = self.settings.receive_timeout;
        let read_all = async {
            let mut buffer = Vec::with_capacity(READ_CHUNK_BYTES.min(cap));
            let mut chunk = vec![0u8; READ_CHUNK_BYTES];
            loop {
                let read = stream.read(&mut chunk).await?;
                if read == 0 {
                    break;
                }
                let room = cap - buffer.len();
                buffer.extend_from_slice(&chunk[..read.min(room)]);
                if buffer.len() >= cap
                    || reply_progress(&buffer) != ReplyProgress::Incomplete
                {
                    break;
                }
            }
            Ok::<_, BridgeError>(buffer)
        };
        timeout(limit, read_all)
            .await
            .map_err(|_| BridgeError::Timeout(limit))?
    }

    async fn run(&self, code: &str) -> Result<ExecutionResult, BridgeError> {
        debug!(
            "Connecting to Unity ({}:{})...",
            self.settings.host, self.settings.port
        );
        let mut stream = self.connect().await?;

        let wrapped = self.harness.wrap(code);
        debug!("Sending {} byte(s) of wrapped code", wrapped.len());
        stream.write_all(wrapped.as_bytes()).await?;
        stream.flush().await?;

        let buffer = self.read_response(&mut stream).await?;
        debug!("Received {} byte(s) from Unity", buffer.len());
        decode_result(&buffer)
    }
}

#[async_trait]
impl CodeExecutor for UnityBridge {
    async fn execute(&self, code: &str) -> ExecutionResult {
        let started = Instant::now();
        match self.run(code).await {
            Ok(result) => {
                info!(
                    "Unity execution finished: status={:?} duration_s={:.3}",
                    result.status,
                    started.elapsed().as_secs_f64()
                );
                result
            }
            Err(err) => {
                warn!("Unity execution failed: {}", err);
                ExecutionResult::error(err.to_string())
            }
        }
    }
}
