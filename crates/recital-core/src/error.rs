//! Error types for Recital.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using Recital's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Recital.
#[derive(Error, Debug)]
pub enum Error {
    // Synthesis provider errors
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Unknown voice: {0}")]
    UnknownVoice(String),

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Input errors
    #[error("No readable text in input")]
    EmptyInput,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// HTTP-specific errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed with status {status}: {message}")]
    StatusError { status: u16, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// User-facing error classes surfaced through the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider, network, quota or playback-device failure.
    Synthesis,
    /// The provider returned audio that could not be decoded.
    Decode,
    /// The input text produced no chunks.
    EmptyInput,
}

/// Clonable error descriptor kept in `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error {
    /// Returns true if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimited { .. }
                | Self::Http(
                    HttpError::ConnectionFailed(_)
                        | HttpError::Timeout
                        | HttpError::StatusError {
                            status: 500..=599,
                            ..
                        }
                )
        )
    }

    /// Returns true if this is a rate limit error.
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Classify this error for the session state.
    ///
    /// Output-device failures travel the same path as synthesis failures.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AudioDecode(_) => ErrorKind::Decode,
            Self::EmptyInput => ErrorKind::EmptyInput,
            _ => ErrorKind::Synthesis,
        }
    }

    /// Build the clonable descriptor for this error.
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        err.info()
    }
}
