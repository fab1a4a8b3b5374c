pub mod client;
pub mod harness;
pub mod types;

use async_trait::async_trait;

pub use client::UnityBridge;
pub use types::{BridgeSettings, ExecutionResult};

/// Runs a block of generated code somewhere and reports how it went.
///
/// Failures are folded into an `ExecutionResult` with `status: "error"`; callers never
/// see a transport error directly.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str) -> ExecutionResult;
}
