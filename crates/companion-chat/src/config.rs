//! Chat client configuration.

use std::time::Duration;

use companion_ollama::{DEFAULT_HOST, DEFAULT_MODEL_NAME, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT};

use crate::filter::FilterConfig;
use crate::options::GenerationOptions;

/// Models tried, in order, when the default model is not installed.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "tinyllama:1.1b",
    "llama2:7b",
    "llama2:7b-chat",
    "gemma:2b",
    "mistral:7b",
    "qwen2:0.5b",
];

/// Default number of non-system messages kept in a conversation.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// System prompt sent when the caller does not provide one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
당신은 친근하고 도움이 되는 AI 어시스턴트입니다. 다음 규칙을 반드시 따라주세요:
1. 항상 친절하고 정중하게 답변하세요
2. 부적절하거나 성적인 내용은 절대 언급하지 마세요
3. 폭력이나 혐오 표현을 사용하지 마세요
4. 건전하고 교육적인 대화를 나누세요
5. 한국어로 답변하세요";

/// Configuration for the chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the inference service.
    pub base_url: String,
    /// Preferred model.
    pub default_model: String,
    /// Alternatives tried in order when the preferred model is missing.
    pub fallback_models: Vec<String>,
    /// Timeout for non-streaming inference calls.
    pub request_timeout: Duration,
    /// Non-system messages kept per conversation.
    pub max_history: usize,
    /// System prompt seeded into new conversations and sent with generate calls.
    pub system_prompt: Option<String>,
    pub options: GenerationOptions,
    pub filter: FilterConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            default_model: DEFAULT_MODEL_NAME.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_history: DEFAULT_MAX_HISTORY,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            options: GenerationOptions::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("COMPANION_OLLAMA_URL")
            .or_else(|_| std::env::var("OLLAMA_HOST"))
            .map(|v| normalize_url(&v))
            .unwrap_or(defaults.base_url);

        let default_model = std::env::var("COMPANION_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_model);

        let request_timeout = std::env::var("COMPANION_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let max_history = std::env::var("COMPANION_MAX_HISTORY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_history);

        Self {
            base_url,
            default_model,
            request_timeout,
            max_history,
            ..defaults
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder::default()
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_url(value: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    }
}

/// Builder for chat configuration.
#[derive(Debug, Default)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = model.into();
        self
    }

    pub fn fallback_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fallback_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_history(mut self, max: usize) -> Self {
        self.config.max_history = max;
        self
    }

    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.config.system_prompt = prompt;
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn filter(mut self, filter: FilterConfig) -> Self {
        self.config.filter = filter;
        self
    }

    pub fn build(self) -> ChatConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.default_model, DEFAULT_MODEL_NAME);
        assert_eq!(config.fallback_models.len(), 6);
        assert_eq!(config.max_history, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(config.system_prompt.is_some());
    }

    #[test]
    fn test_builder() {
        let config = ChatConfig::builder()
            .base_url("http://127.0.0.1:9999")
            .default_model("qwen3:0.6b")
            .fallback_models(["qwen3:0.6b"])
            .max_history(4)
            .system_prompt(None)
            .build();
        assert_eq!(config.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.fallback_models, vec!["qwen3:0.6b"]);
        assert_eq!(config.max_history, 4);
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("0.0.0.0:11434"), "http://0.0.0.0:11434");
        assert_eq!(normalize_url("https://gpu-box:443/"), "https://gpu-box:443");
    }
}
