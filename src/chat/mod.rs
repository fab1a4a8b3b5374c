pub mod attachments;
pub mod code;
pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{ChatRequest, ChatResponse, ChatService, ChatSettings};
