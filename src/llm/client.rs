use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::types::{Completion, CompletionRequest, TokenUsage};
use crate::llm::CompletionModel;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("response had no choices: {0}")]
    MalformedResponse(String),
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
        {
            return message.to_string();
        }
        return truncate_for_log(&value.to_string(), 2000);
    }

    truncate_for_log(trimmed, 2000)
}

fn parse_usage(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usage")?;
    if usage.is_null() {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()),
        completion_tokens: usage.get("completion_tokens").and_then(|v| v.as_u64()),
        total_tokens: usage.get("total_tokens").and_then(|v| v.as_u64()),
    })
}

fn parse_completion(response: &Value) -> Result<Completion, ModelError> {
    let message = response
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .ok_or_else(|| {
            ModelError::MalformedResponse(truncate_for_log(&response.to_string(), 500))
        })?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Completion {
        content,
        usage: parse_usage(response),
    })
}

/// Client for any endpoint speaking the OpenAI `/chat/completions` dialect.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    api_key: String,
    base_url: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        OpenAiCompatClient {
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn call_api(&self, payload: &Value) -> Result<Value, ModelError> {
        debug!(
            "Chat completion request: model={}, messages={}",
            payload.get("model").and_then(|v| v.as_str()).unwrap_or("unknown"),
            payload
                .get("messages")
                .and_then(|v| v.as_array())
                .map(|messages| messages.len())
                .unwrap_or(0)
        );

        let response = get_http_client()
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = summarize_error_body(&body);
            warn!("Chat completion API error: status={}, body={}", status, message);
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ModelError> {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        log_llm_timing("openai-compat", &request.model, request.operation, || async {
            let response = self.call_api(&payload).await?;
            parse_completion(&response)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        });
        let completion = parse_completion(&response).unwrap();
        assert_eq!(completion.content, "hello");
        let usage = completion.usage.unwrap();
        assert_eq!(usage.total_tokens, Some(12));
        assert_eq!(usage.prompt_tokens, Some(10));
    }

    #[test]
    fn missing_usage_is_none() {
        let response = json!({"choices": [{"message": {"content": "x"}}]});
        assert!(parse_completion(&response).unwrap().usage.is_none());
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = parse_completion(&json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }

    #[test]
    fn error_body_prefers_nested_message() {
        assert_eq!(
            summarize_error_body(r#"{"error":{"message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(summarize_error_body("  "), "empty response body");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = OpenAiCompatClient::new("k", "https://api.example.com/v1/");
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
