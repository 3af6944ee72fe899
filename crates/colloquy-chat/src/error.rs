//! Error types for colloquy-chat.

use std::fmt;

/// Result type alias for producer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Substrings that identify a context-length rejection, matched
/// case-insensitively against backend error messages.
const CONTEXT_ERROR_FRAGMENTS: [&str; 3] = ["context length", "too many tokens", "maximum context"];

/// Error code providers attach to context-length rejections.
const CONTEXT_ERROR_CODE: &str = "context_length_exceeded";

/// Errors that can occur while producing a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend invocation failed (API call rejected, transport broke, etc.)
    #[error("backend error: {message}")]
    Backend {
        /// Provider error code, when one was supplied.
        code: Option<String>,
        message: String,
    },

    /// History store operation failed.
    #[error("history store error: {0}")]
    Store(String),

    /// The turn request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The exchange was cancelled before completing.
    #[error("turn cancelled")]
    Cancelled,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a backend error.
    pub fn backend(message: impl fmt::Display) -> Self {
        Self::Backend {
            code: None,
            message: message.to_string(),
        }
    }

    /// Creates a backend error with a provider error code.
    pub fn backend_with_code(code: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            code: Some(code.into()),
            message: message.to_string(),
        }
    }

    /// Creates a history store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl fmt::Display) -> Self {
        Self::InvalidRequest(message.to_string())
    }

    /// Returns true if this is a context-length rejection from the
    /// backend.
    ///
    /// Classification happens once, at the producer boundary: a matching
    /// provider error code, or any of a small set of case-insensitive
    /// message substrings. Only this class of error is retried.
    pub fn is_context_exceeded(&self) -> bool {
        let Self::Backend { code, message } = self else {
            return false;
        };
        if code.as_deref() == Some(CONTEXT_ERROR_CODE) {
            return true;
        }
        let message = message.to_lowercase();
        CONTEXT_ERROR_FRAGMENTS
            .iter()
            .any(|fragment| message.contains(fragment))
    }

    /// Returns true if the exchange was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_classification_by_code() {
        let error = Error::backend_with_code("context_length_exceeded", "request too large");
        assert!(error.is_context_exceeded());
    }

    #[test]
    fn context_classification_by_substring_is_case_insensitive() {
        for message in [
            "This model's maximum CONTEXT LENGTH is 8192 tokens",
            "you sent Too Many Tokens",
            "exceeds the Maximum Context window",
        ] {
            assert!(Error::backend(message).is_context_exceeded(), "{message}");
        }
    }

    #[test]
    fn other_errors_are_not_context_exceeded() {
        assert!(!Error::backend("rate limit exceeded").is_context_exceeded());
        assert!(!Error::store("connection refused").is_context_exceeded());
        assert!(!Error::Cancelled.is_context_exceeded());
    }
}
