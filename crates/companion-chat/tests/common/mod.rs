//! Scriptable stand-in for the Ollama HTTP API.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use companion_chat::{ChatConfig, GenerationOptions, InferenceClient};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
pub struct FakeBackend {
    models: Vec<String>,
    /// Models answering every generation with a 500.
    failing: Vec<String>,
    reply: String,
    /// NDJSON lines for streaming calls, sent one by one.
    frames: Vec<String>,
    /// Pause before each streamed line after the first.
    frame_delay: Duration,
    /// Pause before a non-streaming reply.
    delay: Duration,
    /// Pause before the headers of a streaming reply.
    header_delay: Duration,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeBackend {
    pub fn with_models(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            reply: "Hello!".to_string(),
            ..Default::default()
        }
    }

    pub fn replying(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn streaming(mut self, frames: &[&str]) -> Self {
        self.frames = frames.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn header_delay(mut self, delay: Duration) -> Self {
        self.header_delay = delay;
        self
    }

    pub fn failing(mut self, models: &[&str]) -> Self {
        self.failing = models.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Bodies of generation requests received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Models named by the generation requests received so far.
    pub fn requested_models(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r["model"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Serve on an ephemeral port. Returns the base URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/chat", post(chat))
            .route("/api/generate", post(generate))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

async fn tags(State(state): State<FakeBackend>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .iter()
        .map(|name| json!({ "name": name, "modified_at": "2024-05-01T10:00:00Z", "size": 1024 }))
        .collect();
    Json(json!({ "models": models }))
}

async fn chat(State(state): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    let reply = json!({
        "model": body["model"],
        "created_at": "2024-05-01T10:00:00Z",
        "message": { "role": "assistant", "content": state.reply },
        "done": true,
    });
    respond(state, body, reply).await
}

async fn generate(State(state): State<FakeBackend>, Json(body): Json<Value>) -> Response {
    let reply = json!({
        "model": body["model"],
        "created_at": "2024-05-01T10:00:00Z",
        "response": state.reply,
        "done": true,
    });
    respond(state, body, reply).await
}

async fn respond(state: FakeBackend, body: Value, reply: Value) -> Response {
    state.requests.lock().push(body.clone());

    let model = body["model"].as_str().unwrap_or_default();
    if state.failing.iter().any(|m| m == model) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("model '{}' crashed", model) })),
        )
            .into_response();
    }

    if body["stream"].as_bool() == Some(true) {
        tokio::time::sleep(state.header_delay).await;
        let delay = state.frame_delay;
        let lines = futures_util::stream::iter(state.frames.into_iter().enumerate()).then(
            move |(i, line)| async move {
                if i > 0 {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, Infallible>(format!("{}\n", line))
            },
        );
        return (
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            Body::from_stream(lines),
        )
            .into_response();
    }

    tokio::time::sleep(state.delay).await;
    Json(reply).into_response()
}

/// Client pointed at `base_url` with deterministic model selection.
pub fn client(base_url: &str, default_model: &str) -> InferenceClient {
    let config = ChatConfig::builder()
        .base_url(base_url)
        .default_model(default_model)
        .fallback_models(Vec::<String>::new())
        .request_timeout(Duration::from_secs(5))
        .build();
    InferenceClient::new(config).unwrap()
}

pub fn options() -> GenerationOptions {
    GenerationOptions::default()
}
