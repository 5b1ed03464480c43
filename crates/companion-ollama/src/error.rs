//! Error types for backend operations.

use thiserror::Error;

/// Errors that can occur while managing or talking to the Ollama backend.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// The ollama binary could not be located.
    #[error("ollama binary not found: {0}")]
    BinaryNotFound(String),

    /// The backend process could not be launched or exited during startup.
    #[error("Failed to start inference service: {0}")]
    ServiceStartFailed(String),

    /// The backend did not become ready within the startup timeout.
    #[error("Timeout waiting for inference service to become ready")]
    ServiceStartTimeout,

    /// Network-level failure talking to the backend.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend accepted the request but went quiet for longer than allowed.
    #[error("Timed out after {0:?} waiting for the backend")]
    Timeout(std::time::Duration),

    /// Backend answered with a non-success status or an unexpected body.
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Backend reported `done: false` on a non-streaming response.
    #[error("Backend returned an incomplete response")]
    IncompleteResponse,

    /// `pull` or `create` failed.
    #[error("Failed to install model: {0}")]
    ModelInstallFailed(String),

    /// Manifest file is missing.
    #[error("Model manifest not found at {0}")]
    ManifestNotFound(String),

    /// Artifact referenced by a manifest is missing.
    #[error("Model artifact not found at {0}")]
    ArtifactNotFound(String),

    /// Manifest contains a malformed directive.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OllamaError {
    /// Stable machine-readable code, used for status reporting.
    pub fn code(&self) -> &'static str {
        match self {
            OllamaError::BinaryNotFound(_) => "BINARY_NOT_FOUND",
            OllamaError::ServiceStartFailed(_) => "SERVICE_START_FAILED",
            OllamaError::ServiceStartTimeout => "SERVICE_START_TIMEOUT",
            OllamaError::Transport(_) => "TRANSPORT_ERROR",
            OllamaError::Timeout(_) => "TRANSPORT_TIMEOUT",
            OllamaError::Backend { .. } => "BACKEND_ERROR",
            OllamaError::IncompleteResponse => "INCOMPLETE_RESPONSE",
            OllamaError::ModelInstallFailed(_) => "MODEL_INSTALL_FAILED",
            OllamaError::ManifestNotFound(_) => "MANIFEST_NOT_FOUND",
            OllamaError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            OllamaError::Manifest(_) => "INVALID_MANIFEST",
            OllamaError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this failure came from a generation attempt and may succeed
    /// against another model.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OllamaError::Transport(_)
                | OllamaError::Timeout(_)
                | OllamaError::Backend { .. }
                | OllamaError::IncompleteResponse
        )
    }

    /// Whether the backend could not be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            OllamaError::Transport(e) => e.is_connect() || e.is_timeout(),
            OllamaError::Timeout(_) => true,
            _ => false,
        }
    }
}
