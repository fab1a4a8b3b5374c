use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::bridge::{CodeExecutor, ExecutionResult};
use crate::chat::attachments::collect_attachment_context;
use crate::chat::code::extract_code;
use crate::chat::prompt::{build_messages, build_system_prompt, build_user_turn};
use crate::config::{Config, NO_CODE_MESSAGE, SUMMARY_FALLBACK, SUMMARY_SYSTEM_PROMPT};
use crate::history::{HistoryRole, HistoryStore};
use crate::llm::{
    ChatMessage, CompletionModel, CompletionRequest, OpenAiCompatClient, TokenUsage,
};
use crate::skills::{select_skills, SkillIndex};
use crate::utils::timing::RequestTimer;

const SUMMARY_MAX_TOKENS: u32 = 80;
const SUMMARY_REPLY_CHARS: usize = 2000;

/// Treats an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub status: ChatStatus,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ChatResponse {
    fn error(reply: String) -> Self {
        ChatResponse {
            status: ChatStatus::Error,
            reply,
            selected_skills: None,
            usage: None,
            execution: None,
            summary: None,
        }
    }
}

/// Per-process defaults for a chat cycle; request fields override the model endpoint.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Empty means "use the request's chat model".
    pub summary_model: String,
    pub temperature: f32,
    pub base_skill: String,
    pub history_context_limit: usize,
    pub summary_timeout: Duration,
    pub show_raw_response: bool,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        ChatSettings {
            api_key: config.ai_api_key.clone(),
            base_url: config.ai_base_url.clone(),
            model: config.ai_model.clone(),
            summary_model: config.ai_summary_model.trim().to_string(),
            temperature: config.ai_temperature,
            base_skill: config.base_skill_name.clone(),
            history_context_limit: config.history_context_limit,
            summary_timeout: Duration::from_secs(config.summary_timeout_seconds),
            show_raw_response: config.show_raw_response,
        }
    }

    fn summary_model_for<'a>(&'a self, chat_model: &'a str) -> &'a str {
        if self.summary_model.is_empty() {
            chat_model
        } else {
            &self.summary_model
        }
    }
}

fn override_or(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut clipped = text.chars().take(limit).collect::<String>();
    clipped.push_str("...");
    clipped
}

fn summary_input(prompt: &str, reply: &str, execution: &ExecutionResult) -> String {
    let status = if execution.is_ok() { "ok" } else { "error" };
    format!(
        "User request: {}\n\nAssistant reply: {}\n\nExecution: {} {}",
        prompt,
        clip(reply, SUMMARY_REPLY_CHARS),
        status,
        execution.message.as_deref().unwrap_or_default()
    )
}

async fn append_history(
    history: &Arc<HistoryStore>,
    role: HistoryRole,
    content: String,
    summary: Option<String>,
) {
    // Each append rewrites the log file.
    let history = Arc::clone(history);
    if let Err(err) = task::spawn_blocking(move || history.append(role, &content, summary)).await {
        warn!("History append failed: {}", err);
    }
}

/// One-line summary of an exchange, produced off the request task.
///
/// Always yields a string: a failed, empty or late summary becomes the fallback.
async fn summarize_exchange(
    model: Arc<dyn CompletionModel>,
    request: CompletionRequest,
    limit: Duration,
) -> String {
    let handle = tokio::spawn(async move { model.complete(request).await });
    let abort = handle.abort_handle();

    match timeout(limit, handle).await {
        Ok(Ok(Ok(completion))) => {
            let line = completion
                .content
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or_default()
                .to_string();
            if line.is_empty() {
                warn!("History summary came back empty");
                SUMMARY_FALLBACK.to_string()
            } else {
                line
            }
        }
        Ok(Ok(Err(err))) => {
            warn!("History summary failed: {}", err);
            SUMMARY_FALLBACK.to_string()
        }
        Ok(Err(err)) => {
            warn!("History summary task failed: {}", err);
            SUMMARY_FALLBACK.to_string()
        }
        Err(_) => {
            abort.abort();
            warn!("History summary timed out after {:?}", limit);
            SUMMARY_FALLBACK.to_string()
        }
    }
}

/// Runs one prompt through selection, composition, generation and execution.
pub struct ChatService {
    skills: Arc<SkillIndex>,
    history: Option<Arc<HistoryStore>>,
    executor: Arc<dyn CodeExecutor>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        skills: Arc<SkillIndex>,
        history: Option<Arc<HistoryStore>>,
        executor: Arc<dyn CodeExecutor>,
        settings: ChatSettings,
    ) -> Self {
        ChatService {
            skills,
            history,
            executor,
            settings,
        }
    }

    pub fn skills(&self) -> &SkillIndex {
        &self.skills
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_deref()
    }

    /// Builds the model client from request overrides and runs the cycle.
    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let api_key = override_or(&request.api_key, &self.settings.api_key);
        let base_url = override_or(&request.base_url, &self.settings.base_url);
        let model: Arc<dyn CompletionModel> = Arc::new(OpenAiCompatClient::new(api_key, base_url));
        self.run_with_model(model, request).await
    }

    pub async fn run_with_model(
        &self,
        model: Arc<dyn CompletionModel>,
        request: ChatRequest,
    ) -> ChatResponse {
        let model_name = override_or(&request.model, &self.settings.model);
        let mut timer = RequestTimer::start(
            "/chat",
            &model_name,
            &request.prompt,
            request.attachments.len(),
        );

        let skills = Arc::clone(&self.skills);
        let attachments = request.attachments.clone();
        let project_root = request.project_root.clone();
        let (indexed, attachment_context) = task::spawn_blocking(move || {
            let indexed = skills.scan();
            (indexed, collect_attachment_context(&attachments, project_root.as_deref()))
        })
        .await
        .unwrap_or_else(|err| {
            warn!("Skill scan and attachment loading failed: {}", err);
            (self.skills.len(), String::new())
        });
        debug!("Skill index refreshed with {} skill(s)", indexed);

        let selected =
            select_skills(&self.skills, model.as_ref(), &model_name, &request.prompt).await;
        info!("Selected skills: {:?}", selected);

        let system_prompt = build_system_prompt(&self.skills, &selected, &self.settings.base_skill);
        let window = self
            .history
            .as_ref()
            .map(|history| history.recent_messages(self.settings.history_context_limit))
            .unwrap_or_default();
        let user_turn = build_user_turn(&request.prompt, &attachment_context);
        if self.settings.show_raw_response {
            debug!("Send: role: system, content: {}", system_prompt);
            debug!("Send: role: user, content: {}", user_turn);
        }
        let messages = build_messages(system_prompt, window, user_turn);

        let completion = match model
            .complete(CompletionRequest {
                model: model_name.clone(),
                messages,
                temperature: self.settings.temperature,
                max_tokens: None,
                operation: "chat",
            })
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                error!("Chat completion failed: {}", err);
                timer.finish("error", Some(&err.to_string()));
                return ChatResponse::error(format!("AI Error: {err}"));
            }
        };
        if self.settings.show_raw_response {
            debug!("Raw model reply:\n{}", completion.content);
        }

        let reply = completion.content;
        let usage = completion.usage.unwrap_or_default();

        let execution = match extract_code(&reply) {
            Some(code) => self.executor.execute(&code).await,
            None => ExecutionResult::ok(NO_CODE_MESSAGE),
        };

        let summary = match &self.history {
            Some(history) => {
                append_history(history, HistoryRole::User, request.prompt.clone(), None).await;
                let summary_request = CompletionRequest {
                    model: self.settings.summary_model_for(&model_name).to_string(),
                    messages: vec![
                        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                        ChatMessage::user(summary_input(&request.prompt, &reply, &execution)),
                    ],
                    temperature: 0.0,
                    max_tokens: Some(SUMMARY_MAX_TOKENS),
                    operation: "history_summary",
                };
                let summary = summarize_exchange(
                    Arc::clone(&model),
                    summary_request,
                    self.settings.summary_timeout,
                )
                .await;
                append_history(history, HistoryRole::Assistant, reply.clone(), Some(summary.clone()))
                    .await;
                Some(summary)
            }
            None => None,
        };

        let status = if execution.is_ok() {
            "success"
        } else {
            "execution_error"
        };
        timer.finish(status, execution.message.as_deref());

        ChatResponse {
            status: ChatStatus::Ok,
            reply,
            selected_skills: Some(selected),
            usage: Some(usage),
            execution: Some(execution),
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedModel;
    use crate::llm::{Completion, ModelError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::fs;

    struct RecordingExecutor {
        result: ExecutionResult,
        received: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn returning(result: ExecutionResult) -> Arc<Self> {
            Arc::new(RecordingExecutor {
                result,
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CodeExecutor for RecordingExecutor {
        async fn execute(&self, code: &str) -> ExecutionResult {
            self.received.lock().push(code.to_string());
            self.result.clone()
        }
    }

    struct StallingModel;

    #[async_trait]
    impl CompletionModel for StallingModel {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ModelError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Completion::default())
        }
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            api_key: "sk-test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            model: "test-model".to_string(),
            summary_model: String::new(),
            temperature: 0.1,
            base_skill: "unity".to_string(),
            history_context_limit: 12,
            summary_timeout: Duration::from_secs(5),
            show_raw_response: false,
        }
    }

    fn skills_dir(skills: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in skills {
            fs::write(
                dir.path().join(format!("{name}.md")),
                format!("---\nname: {name}\ndescription: about {name}\n---\n{body}\n"),
            )
            .unwrap();
        }
        dir
    }

    fn request(prompt: &str) -> ChatRequest {
        ChatRequest {
            prompt: prompt.to_string(),
            ..ChatRequest::default()
        }
    }

    #[tokio::test]
    async fn full_cycle_runs_code_and_records_history() {
        let skills = skills_dir(&[("unity", "BASE"), ("alpha", "A"), ("zeta", "Z")]);
        let history_dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::open(history_dir.path().join("h.json")));
        let executor = RecordingExecutor::returning(ExecutionResult::ok("Created cube"));
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            Some(Arc::clone(&history)),
            executor.clone(),
            settings(),
        );
        let model = Arc::new(
            ScriptedModel::new()
                .reply(r#"```json
["zeta", "alpha", "ghost"]
```"#)
                .reply_with_usage("Sure.\n```python\nmake_cube()\n```", 40)
                .reply("Made a cube.\nextra line"),
        );

        let response = service
            .run_with_model(model.clone(), request("make a cube"))
            .await;

        assert_eq!(response.status, ChatStatus::Ok);
        assert_eq!(
            response.selected_skills,
            Some(vec!["zeta".to_string(), "alpha".to_string()])
        );
        assert_eq!(response.usage.unwrap().total_tokens, Some(40));
        assert_eq!(response.execution, Some(ExecutionResult::ok("Created cube")));
        assert_eq!(response.summary.as_deref(), Some("Made a cube."));
        assert_eq!(executor.received.lock().clone(), vec!["make_cube()".to_string()]);

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].temperature, 0.0);
        let main = &requests[1];
        assert_eq!(main.operation, "chat");
        assert_eq!(main.temperature, 0.1);
        assert!(main.messages[0].content.starts_with("BASE"));
        let system = &main.messages[0].content;
        let alpha = system.find("Skill Reference: alpha").unwrap();
        let zeta = system.find("Skill Reference: zeta").unwrap();
        assert!(alpha < zeta);
        assert_eq!(requests[2].operation, "history_summary");

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, HistoryRole::User);
        assert_eq!(entries[0].content, "make a cube");
        assert_eq!(entries[1].summary.as_deref(), Some("Made a cube."));
    }

    #[tokio::test]
    async fn attachments_and_history_reach_disk_off_the_request_task() {
        let skills = skills_dir(&[("unity", "BASE")]);
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("notes.txt"), "cube goes at origin").unwrap();
        let history_path = project.path().join("h.json");
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            Some(Arc::new(HistoryStore::open(&history_path))),
            RecordingExecutor::returning(ExecutionResult::ok("fine")),
            settings(),
        );
        let model = Arc::new(
            ScriptedModel::new()
                .reply("[]")
                .reply("No code here.")
                .reply("Talked about notes."),
        );

        let response = service
            .run_with_model(
                model.clone(),
                ChatRequest {
                    prompt: "read my notes".to_string(),
                    attachments: vec!["notes.txt".to_string()],
                    project_root: Some(project.path().display().to_string()),
                    ..ChatRequest::default()
                },
            )
            .await;

        assert_eq!(response.status, ChatStatus::Ok);
        let requests = model.requests();
        let user_turn = &requests[1].messages.last().unwrap().content;
        assert!(user_turn.contains("File: notes.txt"));
        assert!(user_turn.contains("cube goes at origin"));

        let reopened = HistoryStore::open(&history_path);
        assert_eq!(reopened.entries().len(), 2);
        assert_eq!(reopened.entries()[1].summary.as_deref(), Some("Talked about notes."));
    }

    #[tokio::test]
    async fn reply_without_code_skips_execution() {
        let skills = skills_dir(&[]);
        let executor = RecordingExecutor::returning(ExecutionResult::error("unused"));
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            None,
            executor.clone(),
            settings(),
        );
        // Empty index: no selection call, so the only reply is the main completion.
        let model = Arc::new(ScriptedModel::new().reply("I need more details."));

        let response = service.run_with_model(model.clone(), request("hm")).await;

        assert_eq!(response.status, ChatStatus::Ok);
        assert_eq!(response.execution, Some(ExecutionResult::ok("No code generated.")));
        assert_eq!(response.selected_skills, Some(Vec::new()));
        assert_eq!(response.usage, Some(TokenUsage::default()));
        assert!(response.summary.is_none());
        assert!(executor.received.lock().is_empty());
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn model_failure_aborts_with_ai_error() {
        let skills = skills_dir(&[("unity", "BASE")]);
        let history_dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::open(history_dir.path().join("h.json")));
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            Some(Arc::clone(&history)),
            RecordingExecutor::returning(ExecutionResult::ok("unused")),
            settings(),
        );
        let model = Arc::new(ScriptedModel::new().reply("[]").fail("quota exceeded"));

        let response = service.run_with_model(model, request("x")).await;

        assert_eq!(response.status, ChatStatus::Error);
        assert!(response.reply.starts_with("AI Error:"));
        assert!(response.reply.contains("quota exceeded"));
        assert!(response.execution.is_none());
        assert!(history.is_empty());

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body, serde_json::json!({"status": "error", "reply": response.reply}));
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let skills = skills_dir(&[]);
        let history_dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::open(history_dir.path().join("h.json")));
        for index in 0..20 {
            let role = if index % 2 == 0 {
                HistoryRole::User
            } else {
                HistoryRole::Assistant
            };
            history.append(role, &format!("turn {index}"), None);
        }
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            Some(Arc::clone(&history)),
            RecordingExecutor::returning(ExecutionResult::ok("unused")),
            settings(),
        );
        let model = Arc::new(ScriptedModel::new().reply("no code").reply("Chatted."));

        service.run_with_model(model.clone(), request("next")).await;

        let main = &model.requests()[0];
        assert_eq!(main.messages.len(), 14);
        assert_eq!(main.messages[1].content, "turn 8");
        assert_eq!(main.messages[12].content, "turn 19");
        assert_eq!(main.messages[13].content, "next");
        assert_eq!(history.len(), 22);
    }

    #[tokio::test]
    async fn failed_summary_falls_back() {
        let skills = skills_dir(&[]);
        let history_dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::open(history_dir.path().join("h.json")));
        let service = ChatService::new(
            Arc::new(SkillIndex::new(skills.path())),
            Some(Arc::clone(&history)),
            RecordingExecutor::returning(ExecutionResult::ok("unused")),
            settings(),
        );
        let model = Arc::new(ScriptedModel::new().reply("just text").fail("busy"));

        let response = service.run_with_model(model, request("q")).await;

        assert_eq!(response.status, ChatStatus::Ok);
        assert_eq!(response.summary.as_deref(), Some("Summary unavailable."));
        assert_eq!(
            history.entries()[1].summary.as_deref(),
            Some("Summary unavailable.")
        );
    }

    #[tokio::test]
    async fn stalled_summary_times_out_to_fallback() {
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("x")],
            temperature: 0.0,
            max_tokens: None,
            operation: "history_summary",
        };
        let summary =
            summarize_exchange(Arc::new(StallingModel), request, Duration::from_millis(50)).await;
        assert_eq!(summary, SUMMARY_FALLBACK);
    }

    #[test]
    fn overrides_ignore_blank_values() {
        assert_eq!(override_or(&Some("  ".to_string()), "default"), "default");
        assert_eq!(override_or(&Some("custom".to_string()), "default"), "custom");
        assert_eq!(override_or(&None, "default"), "default");
    }

    #[test]
    fn summary_model_falls_back_to_chat_model() {
        let mut settings = settings();
        assert_eq!(settings.summary_model_for("chat"), "chat");
        settings.summary_model = "small".to_string();
        assert_eq!(settings.summary_model_for("chat"), "small");
    }

    #[test]
    fn request_fields_are_optional() {
        let parsed: ChatRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(parsed.prompt, "hi");
        assert!(parsed.attachments.is_empty());
        assert!(parsed.model.is_none());
    }

    #[test]
    fn null_fields_read_as_missing() {
        let parsed: ChatRequest =
            serde_json::from_str(r#"{"prompt":"x","attachments":null,"model":null}"#).unwrap();
        assert_eq!(parsed.prompt, "x");
        assert!(parsed.attachments.is_empty());
        assert!(parsed.model.is_none());

        let parsed: ChatRequest = serde_json::from_str(r#"{"prompt":null}"#).unwrap();
        assert_eq!(parsed.prompt, "");
    }
}
