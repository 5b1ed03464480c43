//! Sampling options for chat and generate calls.

use companion_ollama::ModelOptions;

use crate::error::ChatError;

/// Stop markers for a new human turn. Always sent, so the model cannot write
/// both sides of the dialogue.
pub const HUMAN_TURN_STOPS: &[&str] = &["User:", "사용자:"];

/// Generation parameters applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Creativity, in `[0, 1]`.
    pub temperature: f32,
    /// Nucleus sampling, in `(0, 1]`.
    pub top_p: f32,
    pub top_k: Option<u32>,
    /// Maximum new tokens.
    pub num_predict: Option<u32>,
    /// Context window size.
    pub num_ctx: Option<u32>,
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: None,
            num_predict: Some(500),
            num_ctx: None,
            stop: vec![
                "User:".to_string(),
                "사용자:".to_string(),
                "<|im_end|>".to_string(),
            ],
        }
    }
}

impl GenerationOptions {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ChatError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ChatError::InvalidOptions(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ChatError::InvalidOptions(format!(
                "top_p must be within (0, 1], got {}",
                self.top_p
            )));
        }
        if self.num_predict == Some(0) {
            return Err(ChatError::InvalidOptions("num_predict must be positive".to_string()));
        }
        Ok(())
    }

    /// Wire options with the human-turn stop markers merged in.
    pub fn to_model_options(&self) -> ModelOptions {
        let mut stop = self.stop.clone();
        for marker in HUMAN_TURN_STOPS {
            if !stop.iter().any(|s| s == marker) {
                stop.push(marker.to_string());
            }
        }

        ModelOptions {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            top_k: self.top_k,
            num_predict: self.num_predict,
            num_ctx: self.num_ctx,
            stop,
        }
    }

    /// Overlay values declared by a model manifest.
    pub fn with_model_defaults(mut self, defaults: &ModelOptions) -> Self {
        if let Some(t) = defaults.temperature {
            self.temperature = t;
        }
        if let Some(p) = defaults.top_p {
            self.top_p = p;
        }
        self.top_k = defaults.top_k.or(self.top_k);
        self.num_predict = defaults.num_predict.or(self.num_predict);
        self.num_ctx = defaults.num_ctx.or(self.num_ctx);
        if !defaults.stop.is_empty() {
            self.stop = defaults.stop.clone();
        }
        self
    }
}
