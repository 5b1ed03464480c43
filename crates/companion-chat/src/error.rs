//! Error types for chat operations.

use companion_ollama::OllamaError;
use thiserror::Error;

/// Errors from the chat client.
///
/// A blocked input is not an error; it is reported as
/// [`ChatOutcome::Blocked`](crate::ChatOutcome::Blocked).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Backend(#[from] OllamaError),

    #[error("No model is installed on the inference service")]
    NoModelAvailable,

    #[error("A request is already in progress for this conversation")]
    RequestInProgress,

    #[error("Invalid generation options: {0}")]
    InvalidOptions(String),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ChatError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Backend(e) => e.code(),
            ChatError::NoModelAvailable => "NO_MODEL_AVAILABLE",
            ChatError::RequestInProgress => "REQUEST_IN_PROGRESS",
            ChatError::InvalidOptions(_) => "INVALID_OPTIONS",
            ChatError::InvalidPattern(_) => "INVALID_PATTERN",
        }
    }

    /// Whether the backend could not be reached at all ("AI not connected").
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ChatError::Backend(e) if e.is_connection_failure())
    }
}
