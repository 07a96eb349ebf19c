//! Model backend configuration.

use std::time::Duration;

use crate::error::{LlmError, Result};

/// Default Generative Language API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model id.
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Environment variable holding the backend credential.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Configuration for the remote model backend.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// API key for the backend.
    pub api_key: String,
    /// Base URL of the API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl ModelConfig {
    /// Create a configuration with explicit values.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Build a configuration from the environment, using the default
    /// endpoint and the given model.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| LlmError::ApiKeyNotFound(API_KEY_ENV.to_string()))?;
        Ok(Self::new(api_key, DEFAULT_BASE_URL, model))
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config() {
        let config = ModelConfig::new("key", DEFAULT_BASE_URL, DEFAULT_MODEL)
            .with_timeout(Duration::from_secs(30));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
