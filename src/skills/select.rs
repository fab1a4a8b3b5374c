use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SKILL_SELECTOR_SYSTEM_PROMPT;
use crate::llm::{ChatMessage, CompletionModel, CompletionRequest};
use crate::skills::index::SkillIndex;

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn parse_json_array_from_text(raw: &str) -> Option<Vec<Value>> {
    let trimmed = strip_code_fences(raw);
    if let Ok(arr) = serde_json::from_str::<Vec<Value>>(&trimmed) {
        return Some(arr);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<Value>>(&trimmed[start..=end]).ok()
}

/// Keeps string items that name an indexed skill, first occurrence only.
fn filter_to_index(candidates: Vec<Value>, index: &SkillIndex) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for candidate in candidates {
        let Some(name) = candidate.as_str() else {
            continue;
        };
        let name = name.trim();
        if !index.contains(name) {
            debug!("Dropping unknown skill '{}' from selection", name);
            continue;
        }
        if seen.insert(name.to_string()) {
            selected.push(name.to_string());
        }
    }
    selected
}

fn build_selection_prompt(menu: &str, prompt: &str) -> String {
    format!("Available Skills:\n{menu}\n\nUser Request: {prompt}\n\nReturn JSON list:")
}

/// Asks the model which skills apply to `prompt`.
///
/// Fails open: any transport or parse failure yields an empty selection so the
/// request can still proceed with the base document alone.
pub async fn select_skills(
    index: &SkillIndex,
    model: &dyn CompletionModel,
    model_name: &str,
    prompt: &str,
) -> Vec<String> {
    if index.is_empty() {
        return Vec::new();
    }

    let request = CompletionRequest {
        model: model_name.to_string(),
        messages: vec![
            ChatMessage::system(SKILL_SELECTOR_SYSTEM_PROMPT),
            ChatMessage::user(build_selection_prompt(&index.menu(), prompt)),
        ],
        temperature: 0.0,
        max_tokens: None,
        operation: "skill_selection",
    };

    let completion = match model.complete(request).await {
        Ok(completion) => completion,
        Err(err) => {
            warn!("Skill selection failed: {}", err);
            return Vec::new();
        }
    };

    let Some(candidates) = parse_json_array_from_text(&completion.content) else {
        warn!(
            "Skill selection failed: response is not a JSON list: {:?}",
            completion.content
        );
        return Vec::new();
    };

    let selected = filter_to_index(candidates, index);
    debug!("Selected skills: [{}]", selected.join(", "));
    selected
}
