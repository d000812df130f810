use std::env;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// HTTP mail relay used for email and group endpoints.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub from: String,
}

/// Settings for outbound deliveries.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
    pub relay: Option<RelayConfig>,
    /// Characters of a response body kept in `response_data`.
    pub response_body_limit: usize,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let relay = env_optional("MAIL_RELAY_URL").map(|url| RelayConfig {
            url: url.trim_end_matches('/').to_string(),
            api_key: env_optional("MAIL_RELAY_API_KEY"),
            from: env_string("MAIL_RELAY_FROM", "mailflow@localhost"),
        });

        Self {
            request_timeout: env_duration_millis("DISPATCH_TIMEOUT_MS", 10_000),
            user_agent: env_string("DISPATCH_USER_AGENT", "mailflow-dispatch/0.1"),
            relay,
            response_body_limit: env_usize("DISPATCH_RESPONSE_BODY_LIMIT", 2_048),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
