use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::llm::types::{Completion, CompletionRequest, TokenUsage};
use crate::llm::{CompletionModel, ModelError};

/// Replays queued replies in order and records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Completion, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        ScriptedModel::default()
    }

    pub fn reply(self, content: &str) -> Self {
        self.replies.lock().push_back(Ok(Completion {
            content: content.to_string(),
            usage: None,
        }));
        self
    }

    pub fn reply_with_usage(self, content: &str, total_tokens: u64) -> Self {
        self.replies.lock().push_back(Ok(Completion {
            content: content.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: Some(total_tokens / 2),
                completion_tokens: Some(total_tokens - total_tokens / 2),
                total_tokens: Some(total_tokens),
            }),
        }));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError> {
        self.requests.lock().push(request);
        match self.replies.lock().pop_front() {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(message)) => Err(ModelError::Api {
                status: 500,
                message,
            }),
            None => Err(ModelError::MalformedResponse(
                "no scripted reply left".to_string(),
            )),
        }
    }
}
