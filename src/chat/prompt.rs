use crate::llm::ChatMessage;
use crate::skills::SkillIndex;

fn skill_reference(name: &str, body: &str) -> String {
    format!("\n--- Skill Reference: {name} ---\n{body}")
}

/// Base document body first (when indexed), then the other selected skills sorted by
/// name, each behind a labeled separator.
///
/// Names missing from the index are ignored, as is a repeat of the base name.
pub fn build_system_prompt(index: &SkillIndex, selection: &[String], base_skill: &str) -> String {
    let mut parts = Vec::new();

    if !base_skill.is_empty() && index.contains(base_skill) {
        parts.push(index.get_body(base_skill));
    }

    let mut others = selection
        .iter()
        .filter(|name| name.as_str() != base_skill && index.contains(name))
        .collect::<Vec<_>>();
    others.sort();
    others.dedup();

    for name in others {
        parts.push(skill_reference(name, &index.get_body(name)));
    }

    parts.join("\n\n")
}

pub fn build_user_turn(prompt: &str, attachment_context: &str) -> String {
    format!("{prompt}{attachment_context}")
}

pub fn build_messages(
    system_prompt: String,
    history_window: Vec<ChatMessage>,
    user_turn: String,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history_window.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history_window);
    messages.push(ChatMessage::user(user_turn));
    messages
}
