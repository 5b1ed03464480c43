//! Request and response shapes for the Ollama HTTP API.
//!
//! Each endpoint has its own type. Required fields are not optional, so a body
//! that does not match fails at deserialization instead of leaking defaults.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Chat message as sent to and received from `/api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Installed model as reported by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// RFC 3339 timestamp as reported by the backend.
    pub modified_at: String,
}

/// Response from `GET /api/tags`.
#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    pub models: Vec<ModelDescriptor>,
}

/// Sampling options forwarded in the `options` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Request to `POST /api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
}

/// Timing counters the backend attaches to final responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Timings {
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

/// Non-streaming response from `/api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    pub response: String,
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(flatten)]
    pub timings: Timings,
}

/// Request to `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
}

/// Non-streaming response from `/api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    pub message: ChatMessage,
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(flatten)]
    pub timings: Timings,
}

/// Message fragment inside a streamed chat frame. The role is often omitted
/// on intermediate frames.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: String,
}

/// One newline-delimited frame of a streaming response.
///
/// `/api/chat` frames carry `message.content`, `/api/generate` frames carry
/// `response`. Either may be absent on the terminal frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub message: Option<FrameMessage>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamFrame {
    /// Content fragment carried by this frame, if any.
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .or(self.response.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Error body returned by the backend.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let msg = ChatMessage::new(Role::Assistant, "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_options_skip_unset_fields() {
        let options = ModelOptions {
            temperature: Some(0.5),
            ..Default::default()
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json, serde_json::json!({ "temperature": 0.5 }));
    }

    #[test]
    fn test_tags_response() {
        let body = r#"{"models":[{"name":"gemma:2b","modified_at":"2024-05-01T10:00:00Z","size":1678447520,"digest":"abc"}]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(tags.models[0].name, "gemma:2b");
        assert_eq!(tags.models[0].size_bytes, 1_678_447_520);
    }

    #[test]
    fn test_chat_response_requires_message() {
        let body = r#"{"model":"gemma:2b","done":true}"#;
        assert!(serde_json::from_str::<ChatResponse>(body).is_err());
    }

    #[test]
    fn test_generate_response_with_timings() {
        let body = r#"{"model":"m","created_at":"t","response":"ok","done":true,"eval_count":12}"#;
        let resp: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.response, "ok");
        assert_eq!(resp.timings.eval_count, Some(12));
    }

    #[test]
    fn test_frame_content() {
        let chat: StreamFrame =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(chat.content(), Some("Hi"));

        let generate: StreamFrame = serde_json::from_str(r#"{"response":" there"}"#).unwrap();
        assert_eq!(generate.content(), Some(" there"));
        assert!(!generate.done);

        let terminal: StreamFrame = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert_eq!(terminal.content(), None);
        assert!(terminal.done);
    }
}
