use std::env;

use chat_wire::TurnConfig;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_API_KEY: &str = "dev-api-key";
pub const DEFAULT_SQLITE_PATH: &str = "data/messages.sqlite";

/// Server configuration, read from the environment (a `.env` file is
/// loaded first by the binary). `RELAY_SQLITE_PATH=:memory:` keeps the
/// store in memory.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub api_key: String,
    pub sqlite_path: String,
    pub turn: TurnConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: number_from_env("RELAY_PORT", DEFAULT_PORT),
            api_key: env_or("RELAY_API_KEY", DEFAULT_API_KEY),
            sqlite_path: env_or("RELAY_SQLITE_PATH", DEFAULT_SQLITE_PATH),
            turn: TurnConfig {
                url: env_or("TURN_SERVER_URL", ""),
                username: env_or("TURN_SERVER_USERNAME", ""),
                credential: env_or("TURN_SERVER_PASSWORD", ""),
            },
        }
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}

fn number_from_env(name: &str, fallback: u16) -> u16 {
    match env::var(name) {
        Ok(value) => match value.parse() {
            Ok(port) => port,
            Err(err) => {
                log::warn!("Invalid {name}={value}: {err}; using {fallback}");
                fallback
            }
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_port_number_falls_back() {
        // Unique variable name so parallel tests cannot interfere.
        unsafe { env::set_var("RELAY_TEST_BAD_PORT", "not-a-port") };
        assert_eq!(number_from_env("RELAY_TEST_BAD_PORT", 4000), 4000);
        unsafe { env::set_var("RELAY_TEST_GOOD_PORT", "8080") };
        assert_eq!(number_from_env("RELAY_TEST_GOOD_PORT", 4000), 8080);
    }
}
