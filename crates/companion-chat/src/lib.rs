//! # Companion Chat
//!
//! Chat layer on top of a local Ollama backend.
//!
//! ```text
//! user text ──> ContentFilter ──> Conversation ──> InferenceClient ──> Ollama
//!                     ^                                   │
//!                     └──────── filter_response <─────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use companion_chat::{ChatConfig, InferenceClient};
//!
//! let client = InferenceClient::new(ChatConfig::from_env())?;
//! let conversation = client.new_conversation();
//! let outcome = client.chat(&conversation, "안녕하세요", &client.config().options).await?;
//! ```

mod client;
mod config;
mod conversation;
mod error;
mod filter;
mod options;
mod stats;

pub use client::{select_model, ChatOutcome, InferenceClient, ModelSelection, StreamControl};
pub use config::{
    ChatConfig, ChatConfigBuilder, DEFAULT_FALLBACK_MODELS, DEFAULT_MAX_HISTORY,
    DEFAULT_SYSTEM_PROMPT,
};
pub use conversation::{Conversation, ConversationMessage, ConversationStore};
pub use error::ChatError;
pub use filter::{
    AgeRating, ContentFilter, FilterConfig, FilterResult, DEFAULT_BLOCKED_NOTICE,
    DEFAULT_EMPTY_NOTICE,
};
pub use options::{GenerationOptions, HUMAN_TURN_STOPS};
pub use stats::{NoopStats, StatsError, StatsReporter, TurnStats, CONVERSATION_COUNT, TOTAL_MESSAGES};

// Re-export backend types used in this crate's API
pub use companion_ollama::{ModelDescriptor, Role};
pub use tokio_util::sync::CancellationToken;
