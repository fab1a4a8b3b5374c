pub mod client;
#[cfg(test)]
pub mod mock;
pub mod types;

use async_trait::async_trait;

pub use client::{ModelError, OpenAiCompatClient};
pub use types::{ChatMessage, Completion, CompletionRequest, MessageRole, TokenUsage};

/// A chat-completion backend. Implemented by the HTTP client and by test doubles.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError>;
}
