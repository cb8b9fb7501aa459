//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the language-model backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from backend: {reason}")]
    ResponseParse {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether the backend could not be reached at all (as opposed to
    /// answering badly).
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unreachable() {
        let err = InferenceError::ConnectionFailed {
            endpoint: "http://localhost:11434".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_unreachable());
        assert!(InferenceError::Timeout { duration_secs: 30 }.is_unreachable());
        assert!(!InferenceError::HttpError {
            status: 404,
            body: "model not found".into()
        }
        .is_unreachable());
    }

    #[test]
    fn test_http_error_display() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 500: test body");
    }
}
