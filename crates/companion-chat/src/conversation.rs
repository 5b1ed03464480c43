//! Bounded conversation memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use companion_ollama::{ChatMessage, Role};
use parking_lot::Mutex;

use crate::error::ChatError;

/// One dialogue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

impl From<&ConversationMessage> for ChatMessage {
    fn from(message: &ConversationMessage) -> Self {
        ChatMessage::new(message.role, message.content.clone())
    }
}

/// Ordered message history capped at `max_turns` non-system messages.
///
/// When the cap is exceeded the oldest non-system messages are evicted
/// first. System messages are never evicted.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<ConversationMessage>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    /// Store pre-seeded with a permanent system message.
    pub fn with_system_prompt(max_turns: usize, prompt: impl Into<String>) -> Self {
        let mut store = Self::new(max_turns);
        store.messages.push(ConversationMessage::system(prompt));
        store
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.evict();
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user and assistant messages.
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role != Role::System).count()
    }

    /// Remove every non-system message.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    pub fn to_wire(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(ChatMessage::from).collect()
    }

    fn evict(&mut self) {
        let mut excess = self.turn_count().saturating_sub(self.max_turns);
        if excess == 0 {
            return;
        }
        self.messages.retain(|m| {
            if excess > 0 && m.role != Role::System {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// Shared handle to one conversation.
///
/// Clones refer to the same history. At most one generation may be in flight
/// per conversation; a second caller gets [`ChatError::RequestInProgress`].
#[derive(Debug, Clone)]
pub struct Conversation {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    store: Mutex<ConversationStore>,
    in_flight: AtomicBool,
}

impl Conversation {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Copy of the current history.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.inner.store.lock().messages().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.lock().is_empty()
    }

    /// Drop the dialogue, keeping the system prompt.
    pub fn clear(&self) {
        self.inner.store.lock().clear();
    }

    /// Whether a generation is running against this conversation.
    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Claim the conversation for one generation.
    pub(crate) fn begin(&self) -> Result<FlightGuard, ChatError> {
        self.inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ChatError::RequestInProgress)?;
        Ok(FlightGuard {
            inner: self.inner.clone(),
        })
    }

    /// History as it will look once `message` is appended, in wire form.
    pub(crate) fn preview_with(&self, message: &ConversationMessage) -> Vec<ChatMessage> {
        let mut store = self.inner.store.lock().clone();
        store.push(message.clone());
        store.to_wire()
    }

    /// Append a finished turn.
    pub(crate) fn commit(&self, user: ConversationMessage, assistant: ConversationMessage) {
        let mut store = self.inner.store.lock();
        store.push(user);
        store.push(assistant);
    }
}

/// Releases the single-flight claim when dropped.
#[derive(Debug)]
pub(crate) struct FlightGuard {
    inner: Arc<Inner>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}
