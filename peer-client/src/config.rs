use std::env;

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:4000/ws";
pub const DEFAULT_API_URL: &str = "http://localhost:4000";
pub const DEFAULT_API_KEY: &str = "dev-api-key";
pub const DEFAULT_DISPLAY_NAME: &str = "anonymous";

/// Client configuration; environment defaults, overridable from the CLI.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the signaling gateway.
    pub signaling_url: String,
    /// Base URL of the relay's REST surface.
    pub api_url: String,
    /// Shared secret presented at connect time.
    pub api_key: String,
    /// Name announced to other peers in `hello`.
    pub display_name: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            signaling_url: env_or("CHAT_SIGNALING_URL", DEFAULT_SIGNALING_URL),
            api_url: env_or("CHAT_API_URL", DEFAULT_API_URL),
            api_key: env_or("CHAT_API_KEY", DEFAULT_API_KEY),
            display_name: env_or("CHAT_DISPLAY_NAME", DEFAULT_DISPLAY_NAME),
        }
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}
