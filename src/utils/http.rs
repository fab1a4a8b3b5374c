use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

// Only connecting is bounded; long completions must not be cut off.
static MODEL_HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(15))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .expect("Failed to build HTTP client")
});

/// Shared client for model endpoints; connection pools are reused across requests.
pub fn get_http_client() -> &'static Client {
    &MODEL_HTTP_CLIENT
}
