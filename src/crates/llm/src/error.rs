//! Error types for model backend operations.

use thiserror::Error;

/// Result type for model backend operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling the model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend rejected the credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credential not found in the environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Rate limit exceeded (429-class).
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Backend unavailable (503-class).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Backend returned an unusable response body.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Model output could not be coerced into the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Any other backend-reported error.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl LlmError {
    /// Whether a retry may succeed. Transient classes are the rate-limit
    /// and unavailable signals, also recognized by their `429`/`503`
    /// substring tags in provider error payloads.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::Unavailable(_) => true,
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Provider(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("429")
                    || msg.contains("503")
                    || msg.contains("rate limit")
                    || msg.contains("unavailable")
                    || msg.contains("overloaded")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Unavailable("overloaded".into()).is_transient());
    }

    #[test]
    fn provider_substring_tags_are_transient() {
        assert!(LlmError::Provider("backend returned 503".into()).is_transient());
        assert!(LlmError::Provider("429 Too Many Requests".into()).is_transient());
        assert!(!LlmError::Provider("model not found".into()).is_transient());
    }

    #[test]
    fn auth_and_parse_are_permanent() {
        assert!(!LlmError::Authentication("bad key".into()).is_transient());
        assert!(!LlmError::Parse("no JSON".into()).is_transient());
    }
}
