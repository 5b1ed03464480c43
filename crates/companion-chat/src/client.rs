//! Filtered, context-aware chat against the inference service.

use std::sync::Arc;

use companion_ollama::{
    ChatMessage, ChatRequest, FrameStream, GenerateRequest, ModelDescriptor, ModelOptions,
    OllamaClient, OllamaError,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::conversation::{Conversation, ConversationMessage, ConversationStore};
use crate::error::ChatError;
use crate::filter::ContentFilter;
use crate::options::GenerationOptions;
use crate::stats::{self, StatsReporter, TurnCounters, TurnStats};

/// Result of a chat or generate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Filtered model reply.
    Reply(String),
    /// Input was rejected by the content filter; the backend was not called.
    Blocked { notice: String },
    /// Streaming was cancelled by the caller. `kept` holds the filtered
    /// partial reply when it was kept in the conversation.
    Cancelled { kept: Option<String> },
}

impl ChatOutcome {
    /// Text to display, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            ChatOutcome::Reply(text) => Some(text),
            ChatOutcome::Blocked { notice } => Some(notice),
            ChatOutcome::Cancelled { kept } => kept.as_deref(),
        }
    }
}

/// Model picked for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub name: String,
    /// Neither the default nor a configured fallback was installed.
    pub degraded: bool,
}

/// Caller controls for a streaming call.
#[derive(Debug, Clone, Default)]
pub struct StreamControl {
    /// Cancelling stops reading and releases the connection.
    pub cancel: CancellationToken,
    /// Keep the partial reply in the conversation on cancellation.
    pub keep_partial: bool,
}

/// Pick a model from the installed inventory.
///
/// The default model wins, then the first installed fallback, then the first
/// installed model (degraded).
pub fn select_model(
    default_model: &str,
    fallbacks: &[String],
    installed: &[String],
) -> Result<ModelSelection, ChatError> {
    let is_installed = |name: &str| installed.iter().any(|m| m == name);

    if is_installed(default_model) {
        return Ok(ModelSelection {
            name: default_model.to_string(),
            degraded: false,
        });
    }

    if let Some(fallback) = fallbacks.iter().find(|f| is_installed(f)) {
        info!("Default model {} not installed, using {}", default_model, fallback);
        return Ok(ModelSelection {
            name: fallback.clone(),
            degraded: false,
        });
    }

    match installed.first() {
        Some(first) => {
            warn!(
                "No preferred model installed, falling back to first available model {}",
                first
            );
            Ok(ModelSelection {
                name: first.clone(),
                degraded: true,
            })
        }
        None => Err(ChatError::NoModelAvailable),
    }
}

enum Prompt<'a> {
    Chat(Vec<ChatMessage>),
    Generate { prompt: &'a str, system: Option<&'a str> },
}

enum StreamEnd {
    Finished,
    Cancelled,
}

/// Client issuing filtered chat and generate requests.
pub struct InferenceClient {
    ollama: OllamaClient,
    config: ChatConfig,
    filter: Arc<ContentFilter>,
    selection: RwLock<Option<ModelSelection>>,
    stats: Option<Arc<dyn StatsReporter>>,
    counters: TurnCounters,
}

impl InferenceClient {
    /// Create a client. Fails if the configured filter patterns do not compile.
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        config.options.validate()?;
        let filter = ContentFilter::new(config.filter.clone())?;
        let ollama = OllamaClient::with_url(&config.base_url).with_timeout(config.request_timeout);

        Ok(Self {
            ollama,
            config,
            filter: Arc::new(filter),
            selection: RwLock::new(None),
            stats: None,
            counters: TurnCounters::default(),
        })
    }

    /// Share a filter with other components.
    pub fn with_filter(mut self, filter: Arc<ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Forward turn counters to `reporter` after every completed turn.
    pub fn with_stats(mut self, reporter: Arc<dyn StatsReporter>) -> Self {
        self.stats = Some(reporter);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn filter(&self) -> &Arc<ContentFilter> {
        &self.filter
    }

    /// Wire client for the configured service.
    pub fn ollama(&self) -> &OllamaClient {
        &self.ollama
    }

    /// Counters as of the last completed turn.
    pub fn stats(&self) -> TurnStats {
        self.counters.snapshot()
    }

    /// Fresh conversation seeded with the configured system prompt.
    pub fn new_conversation(&self) -> Conversation {
        let store = match &self.config.system_prompt {
            Some(prompt) => ConversationStore::with_system_prompt(self.config.max_history, prompt),
            None => ConversationStore::new(self.config.max_history),
        };
        Conversation::new(store)
    }

    /// Installed models.
    pub async fn models(&self) -> Result<Vec<ModelDescriptor>, ChatError> {
        Ok(self.ollama.list_models().await?)
    }

    pub async fn is_model_installed(&self, name: &str) -> Result<bool, ChatError> {
        Ok(self.models().await?.iter().any(|m| m.name == name))
    }

    /// Model used for requests, resolved once against the inventory.
    pub async fn resolve_model(&self) -> Result<ModelSelection, ChatError> {
        let cached = self.selection.read().clone();
        if let Some(selection) = cached {
            return Ok(selection);
        }

        let installed: Vec<String> = self.models().await?.into_iter().map(|m| m.name).collect();
        let selection = select_model(&self.config.default_model, &self.config.fallback_models, &installed)?;
        debug!("Selected model {} (degraded: {})", selection.name, selection.degraded);
        *self.selection.write() = Some(selection.clone());
        Ok(selection)
    }

    /// Pin the model used for requests.
    pub fn set_model(&self, name: impl Into<String>) {
        *self.selection.write() = Some(ModelSelection {
            name: name.into(),
            degraded: false,
        });
    }

    /// Forget the resolved model so the next request checks the inventory again.
    pub fn refresh_model(&self) {
        *self.selection.write() = None;
    }

    /// One chat turn, waiting for the whole reply.
    ///
    /// The turn is appended to the conversation only once the reply is in.
    /// Blocked input returns [`ChatOutcome::Blocked`] without contacting the
    /// backend.
    pub async fn chat(
        &self,
        conversation: &Conversation,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<ChatOutcome, ChatError> {
        options.validate()?;
        let _guard = conversation.begin()?;

        let input = self.filter.filter_user_input(text);
        if !input.is_appropriate {
            return Ok(ChatOutcome::Blocked {
                notice: input.filtered_text,
            });
        }

        let user = ConversationMessage::user(input.filtered_text);
        let prompt = Prompt::Chat(conversation.preview_with(&user));

        let raw = self.complete_with_retry(&prompt, &options.to_model_options()).await?;
        let reply = self.filter.filter_response(raw.as_str());

        conversation.commit(user, ConversationMessage::assistant(reply.clone()));
        self.finish_turn();
        Ok(ChatOutcome::Reply(reply))
    }

    /// One chat turn, streaming.
    ///
    /// Content fragments reach `on_chunk` unfiltered as they arrive. The
    /// assembled reply is filtered once; that text is stored and returned.
    pub async fn chat_stream<F>(
        &self,
        conversation: &Conversation,
        text: &str,
        options: &GenerationOptions,
        control: &StreamControl,
        on_chunk: F,
    ) -> Result<ChatOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        options.validate()?;
        let _guard = conversation.begin()?;

        let input = self.filter.filter_user_input(text);
        if !input.is_appropriate {
            return Ok(ChatOutcome::Blocked {
                notice: input.filtered_text,
            });
        }

        let user = ConversationMessage::user(input.filtered_text);
        let prompt = Prompt::Chat(conversation.preview_with(&user));

        let (raw, end) = self
            .stream_with_retry(&prompt, &options.to_model_options(), control, on_chunk)
            .await?;

        match end {
            StreamEnd::Finished => {
                let reply = self.filter.filter_response(raw.as_str());
                conversation.commit(user, ConversationMessage::assistant(reply.clone()));
                self.finish_turn();
                Ok(ChatOutcome::Reply(reply))
            }
            StreamEnd::Cancelled if control.keep_partial && !raw.trim().is_empty() => {
                let kept = self.filter.filter_response(raw.as_str());
                conversation.commit(user, ConversationMessage::assistant(kept.clone()));
                Ok(ChatOutcome::Cancelled { kept: Some(kept) })
            }
            StreamEnd::Cancelled => {
                debug!("Discarding {} bytes of partial reply", raw.len());
                Ok(ChatOutcome::Cancelled { kept: None })
            }
        }
    }

    /// Single-shot completion outside any conversation.
    ///
    /// `system` overrides the configured system prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<ChatOutcome, ChatError> {
        options.validate()?;

        let input = self.filter.filter_user_input(prompt);
        if !input.is_appropriate {
            return Ok(ChatOutcome::Blocked {
                notice: input.filtered_text,
            });
        }

        let prompt = Prompt::Generate {
            prompt: &input.filtered_text,
            system: system.or(self.config.system_prompt.as_deref()),
        };
        let raw = self.complete_with_retry(&prompt, &options.to_model_options()).await?;
        Ok(ChatOutcome::Reply(self.filter.filter_response(raw.as_str())))
    }

    /// Streaming single-shot completion, with the same chunk contract as
    /// [`chat_stream`](Self::chat_stream).
    pub async fn generate_stream<F>(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerationOptions,
        control: &StreamControl,
        on_chunk: F,
    ) -> Result<ChatOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        options.validate()?;

        let input = self.filter.filter_user_input(prompt);
        if !input.is_appropriate {
            return Ok(ChatOutcome::Blocked {
                notice: input.filtered_text,
            });
        }

        let prompt = Prompt::Generate {
            prompt: &input.filtered_text,
            system: system.or(self.config.system_prompt.as_deref()),
        };
        let (raw, end) = self
            .stream_with_retry(&prompt, &options.to_model_options(), control, on_chunk)
            .await?;

        Ok(match end {
            StreamEnd::Finished => ChatOutcome::Reply(self.filter.filter_response(raw.as_str())),
            StreamEnd::Cancelled if control.keep_partial && !raw.trim().is_empty() => {
                ChatOutcome::Cancelled {
                    kept: Some(self.filter.filter_response(raw.as_str())),
                }
            }
            StreamEnd::Cancelled => ChatOutcome::Cancelled { kept: None },
        })
    }

    async fn complete_with_retry(
        &self,
        prompt: &Prompt<'_>,
        options: &ModelOptions,
    ) -> Result<String, ChatError> {
        let selection = self.resolve_model().await?;

        match self.complete(prompt, &selection.name, options).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_retryable() => {
                warn!("Model {} failed: {}", selection.name, e);
                let Some(other) = self.alternative_model(&selection.name).await else {
                    return Err(e.into());
                };
                info!("Retrying with model {}", other);
                let text = self.complete(prompt, &other, options).await?;
                self.set_model(other);
                Ok(text)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(
        &self,
        prompt: &Prompt<'_>,
        model: &str,
        options: &ModelOptions,
    ) -> Result<String, OllamaError> {
        match prompt {
            Prompt::Chat(messages) => {
                let request = ChatRequest {
                    model: model.to_string(),
                    messages: messages.clone(),
                    stream: false,
                    options: Some(options.clone()),
                };
                Ok(self.ollama.chat(&request).await?.message.content)
            }
            Prompt::Generate { prompt, system } => {
                let request = generate_request(model, prompt, *system, false, options);
                Ok(self.ollama.generate(&request).await?.response)
            }
        }
    }

    /// Stream a reply, retrying once on another model if the first attempt
    /// fails before anything reached the caller.
    async fn stream_with_retry<F>(
        &self,
        prompt: &Prompt<'_>,
        options: &ModelOptions,
        control: &StreamControl,
        mut on_chunk: F,
    ) -> Result<(String, StreamEnd), ChatError>
    where
        F: FnMut(&str),
    {
        let selection = tokio::select! {
            _ = control.cancel.cancelled() => return Ok((String::new(), StreamEnd::Cancelled)),
            selection = self.resolve_model() => selection?,
        };
        let mut model = selection.name;
        let mut retried = false;

        loop {
            let mut text = String::new();
            // Dropping the pending request releases its connection.
            let opened = tokio::select! {
                _ = control.cancel.cancelled() => return Ok((text, StreamEnd::Cancelled)),
                opened = self.open_stream(prompt, &model, options) => opened,
            };
            let result = match opened {
                Ok(mut frames) => consume(&mut frames, control, &mut text, &mut on_chunk).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(end) => {
                    if retried {
                        self.set_model(model);
                    }
                    return Ok((text, end));
                }
                Err(e) if !retried && text.is_empty() && e.is_retryable() => {
                    warn!("Model {} failed: {}", model, e);
                    let Some(other) = self.alternative_model(&model).await else {
                        return Err(e.into());
                    };
                    info!("Retrying with model {}", other);
                    model = other;
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn open_stream(
        &self,
        prompt: &Prompt<'_>,
        model: &str,
        options: &ModelOptions,
    ) -> Result<FrameStream, OllamaError> {
        match prompt {
            Prompt::Chat(messages) => {
                let request = ChatRequest {
                    model: model.to_string(),
                    messages: messages.clone(),
                    stream: true,
                    options: Some(options.clone()),
                };
                self.ollama.chat_stream(&request).await
            }
            Prompt::Generate { prompt, system } => {
                let request = generate_request(model, prompt, *system, true, options);
                self.ollama.generate_stream(&request).await
            }
        }
    }

    /// Another installed model than `failed`, if any.
    async fn alternative_model(&self, failed: &str) -> Option<String> {
        match self.ollama.list_models().await {
            Ok(models) => models.into_iter().map(|m| m.name).find(|name| name != failed),
            Err(e) => {
                debug!("Could not list models for retry: {}", e);
                None
            }
        }
    }

    fn finish_turn(&self) {
        let stats = self.counters.record_turn();
        if let Some(reporter) = &self.stats {
            stats::report(reporter.clone(), stats);
        }
    }
}

/// Read frames until the terminal marker, the end of the transport, or
/// cancellation. Fragments are appended to `text` and handed to `on_chunk`.
async fn consume<F>(
    frames: &mut FrameStream,
    control: &StreamControl,
    text: &mut String,
    on_chunk: &mut F,
) -> Result<StreamEnd, OllamaError>
where
    F: FnMut(&str),
{
    loop {
        if control.cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled);
        }

        let frame = tokio::select! {
            _ = control.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            frame = frames.next_frame() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                if let Some(content) = frame.content() {
                    text.push_str(content);
                    on_chunk(content);
                }
                if frame.done {
                    return Ok(StreamEnd::Finished);
                }
            }
            Some(Err(e)) => return Err(e),
            None => {
                debug!("Stream ended without a terminal frame, keeping {} bytes", text.len());
                return Ok(StreamEnd::Finished);
            }
        }
    }
}

fn generate_request(
    model: &str,
    prompt: &str,
    system: Option<&str>,
    stream: bool,
    options: &ModelOptions,
) -> GenerateRequest {
    GenerateRequest {
        model: model.to_string(),
        prompt: prompt.to_string(),
        system: system.map(str::to_string),
        stream,
        options: Some(options.clone()),
    }
}
