//! Generation types — provider-neutral completion trait and errors.

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by generation client operations.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// The required API key environment variable is not set.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    /// The HTTP request to the provider failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// The provider response body could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::event::ErrorCode for GenError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::MissingApiKey { .. } => "E_MISSING_API_KEY",
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// COMPLETION TRAIT
// =============================================================================

/// Provider-neutral async trait for text completion. Enables mocking in tests.
#[async_trait::async_trait]
pub trait Generate: Send + Sync {
    /// Send one system+user prompt pair and return the assistant text.
    ///
    /// # Errors
    ///
    /// Returns a [`GenError`] if the request fails or the response is
    /// malformed.
    async fn complete(&self, max_tokens: u32, system: &str, prompt: &str) -> Result<String, GenError>;
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
