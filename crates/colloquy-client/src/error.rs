//! Error types for colloquy-client.

use std::fmt;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while consuming a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The HTTP exchange could not be opened or the body read failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server refused the turn request.
    #[error("request rejected: status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        message: String,
    },

    /// The stream ended without a `finish` event.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The exchange was cancelled locally.
    #[error("turn cancelled")]
    Cancelled,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a transport error.
    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Creates a rejected-request error.
    pub fn rejected(status: u16, message: impl fmt::Display) -> Self {
        Self::Rejected {
            status,
            message: message.to_string(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl fmt::Display) -> Self {
        Self::Protocol(message.to_string())
    }

    /// Returns true if retrying the turn is reasonable.
    ///
    /// Cancellation is not an error condition and is never retried
    /// automatically; everything else surfaces as a single retryable
    /// prompt to the user.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(Error::transport("connection reset").is_retryable());
        assert!(Error::protocol("stream ended early").is_retryable());
    }
}
