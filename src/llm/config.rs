//! Generation configuration parsed from environment variables.

use super::types::GenError;

pub const DEFAULT_GEN_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GEN_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_GEN_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_GEN_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeouts: GenTimeouts,
}

impl GenConfig {
    /// Build typed generation config from environment variables.
    ///
    /// Required:
    /// - `GEN_API_KEY_ENV` (names the env var containing the key)
    ///
    /// Optional:
    /// - `GEN_MODEL`: default `llama-3.3-70b-versatile`
    /// - `GEN_BASE_URL`: default Groq OpenAI-compatible base URL
    /// - `GEN_REQUEST_TIMEOUT_SECS`: default 120
    /// - `GEN_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns `MissingApiKey` when the key variable is absent.
    pub fn from_env() -> Result<Self, GenError> {
        let key_var =
            std::env::var("GEN_API_KEY_ENV").map_err(|_| GenError::MissingApiKey { var: "GEN_API_KEY_ENV".into() })?;
        let api_key = std::env::var(&key_var).map_err(|_| GenError::MissingApiKey { var: key_var.clone() })?;

        let model = std::env::var("GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());
        let base_url = std::env::var("GEN_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEN_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let timeouts = GenTimeouts {
            request_secs: env_parse_u64("GEN_REQUEST_TIMEOUT_SECS", DEFAULT_GEN_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("GEN_CONNECT_TIMEOUT_SECS", DEFAULT_GEN_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { api_key, model, base_url, timeouts })
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
