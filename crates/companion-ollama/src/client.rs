//! HTTP client for the Ollama API.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::api::{
    ChatRequest, ChatResponse, ErrorResponse, GenerateRequest, GenerateResponse,
    ModelDescriptor, TagsResponse,
};
use crate::error::OllamaError;
use crate::stream::FrameStream;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Default timeout for inference requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for establishing a TCP connection to the backend.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for communicating with an Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl OllamaClient {
    /// Create a new client with default URL (127.0.0.1:11434).
    pub fn new() -> Self {
        Self::with_url(format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT))
    }

    /// Create a new client with a custom URL.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Create a new client with a custom port on localhost.
    pub fn with_port(port: u16) -> Self {
        Self::with_url(format!("http://{}:{}", DEFAULT_HOST, port))
    }

    /// Set the timeout applied to chat and generate calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the inference request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Lightweight status probe against the model inventory endpoint.
    pub async fn check_health(&self, timeout: Duration) -> Result<(), OllamaError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).timeout(timeout).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// List models installed on the backend.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let tags: TagsResponse = Self::decode(response).await?;
        Ok(tags.models)
    }

    /// Single-shot completion via `/api/generate`.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, OllamaError> {
        let request = GenerateRequest {
            stream: false,
            ..request.clone()
        };

        let response = self.post("/api/generate", &request, false).await?;
        let body: GenerateResponse = Self::decode(response).await?;

        if !body.done {
            return Err(OllamaError::IncompleteResponse);
        }
        Ok(body)
    }

    /// Streaming completion via `/api/generate`.
    pub async fn generate_stream(&self, request: &GenerateRequest) -> Result<FrameStream, OllamaError> {
        let request = GenerateRequest {
            stream: true,
            ..request.clone()
        };

        let response = self.post("/api/generate", &request, true).await?;
        Self::ensure_success(response)
            .await
            .map(|r| FrameStream::new(r, self.request_timeout))
    }

    /// Multi-turn chat via `/api/chat`.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, OllamaError> {
        let request = ChatRequest {
            stream: false,
            ..request.clone()
        };

        let response = self.post("/api/chat", &request, false).await?;
        let body: ChatResponse = Self::decode(response).await?;

        if !body.done {
            return Err(OllamaError::IncompleteResponse);
        }
        Ok(body)
    }

    /// Streaming multi-turn chat via `/api/chat`.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<FrameStream, OllamaError> {
        let request = ChatRequest {
            stream: true,
            ..request.clone()
        };

        let response = self.post("/api/chat", &request, true).await?;
        Self::ensure_success(response)
            .await
            .map(|r| FrameStream::new(r, self.request_timeout))
    }

    /// For non-streaming calls the request timeout covers the whole body.
    /// Streaming calls only bound the wait for response headers here; the
    /// body is bounded per frame by [`FrameStream`].
    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        streaming: bool,
    ) -> Result<reqwest::Response, OllamaError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} (stream: {})", url, streaming);

        let builder = self.client.post(&url).json(body);
        if !streaming {
            return Ok(builder.timeout(self.request_timeout).send().await?);
        }

        tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| OllamaError::Timeout(self.request_timeout))?
            .map_err(OllamaError::from)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, OllamaError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, OllamaError> {
        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        serde_json::from_str(&text).map_err(|e| OllamaError::Backend {
            status,
            message: format!("unexpected response shape: {}", e),
        })
    }

    /// Build a backend error, preferring the `error` field of a JSON body.
    async fn error_from_response(response: reqwest::Response) -> OllamaError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);

        OllamaError::Backend { status, message }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}
