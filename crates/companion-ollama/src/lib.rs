//! Local Ollama backend for Companion.
//!
//! This crate discovers or launches an `ollama serve` process, talks to its
//! HTTP API, and makes sure the models the chat client needs are installed.

pub mod api;
mod client;
mod config;
mod error;
mod manifest;
mod model;
pub mod paths;
mod server;
mod stream;

pub use api::{
    ChatMessage, ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, ModelDescriptor,
    ModelOptions, Role, StreamFrame,
};
pub use client::{OllamaClient, DEFAULT_REQUEST_TIMEOUT};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::OllamaError;
pub use manifest::Manifest;
pub use model::{parse_list_output, parse_percent, InstallProgress, InstallSource, ModelProvisioner};
pub use server::{ErrorInfo, InferenceServiceManager, ServiceState, ServiceStatus, StatusHandle};
pub use stream::{FrameStream, NdjsonDecoder};

/// Default loopback host of the Ollama server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port of the Ollama server.
pub const DEFAULT_PORT: u16 = 11434;

/// Model shipped with the application.
pub const DEFAULT_MODEL_NAME: &str = "DeepSeek-R1-Distill-Qwen-1.5B-Q6_K_L";

/// Artifact file of the packaged model.
pub const DEFAULT_MODEL_FILENAME: &str = "DeepSeek-R1-Distill-Qwen-1.5B-Q6_K_L.gguf";
