use std::sync::Arc;

use tokio::sync::Notify;

use crate::chat::ChatService;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    /// Signalled by `/shutdown`; the server drains and exits once notified.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        AppState {
            chat: Arc::new(chat),
            shutdown: Arc::new(Notify::new()),
        }
    }
}
