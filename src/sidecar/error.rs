//! Error types for the sidecar client.

use thiserror::Error;

/// Errors from the local model sidecar.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Sidecar unreachable, connection reset, or request timed out.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Sidecar answered with a non-2xx status.
    #[error("sidecar returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// Sidecar answered 2xx but the body was not the expected shape.
    #[error("invalid sidecar response: {0}")]
    InvalidResponse(String),

    /// Bad host/port/timeout configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the underlying failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
