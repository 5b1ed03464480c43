//! Content filtering for both directions of chat traffic.
//!
//! User input is classified before it reaches the backend. Model output has
//! its reasoning segments stripped and is replaced with a canned safe
//! response when it still violates policy.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use tracing::info;

use crate::error::ChatError;

/// Maximum characters of filtered text written to the audit log.
const LOG_EXCERPT_CHARS: usize = 50;

const DEFAULT_WORDS: &[&str] = &[
    "욕설", "비속어", "성적", "폭력", "혐오",
    "fuck", "shit", "bitch", "damn",
    "porn", "sex", "nude", "naked", "penis", "vagina",
    "kill", "murder", "suicide", "death", "blood",
    "hate", "racist", "nazi", "terrorist",
];

const DEFAULT_PATTERNS: &[&str] = &[
    "성적.*내용",
    "폭력.*묘사",
    "자살.*방법",
    "약물.*사용",
    "범죄.*방법",
    "혐오.*표현",
    "차별.*내용",
];

const DEFAULT_REASONING_TAGS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<reasoning>", "</reasoning>"),
    ("<|begin_of_thought|>", "<|end_of_thought|>"),
];

const DEFAULT_SAFE_RESPONSES: &[&str] = &[
    "죄송합니다. 그런 내용에 대해서는 답변할 수 없습니다.",
    "부적절한 질문이므로 답변을 드릴 수 없습니다.",
    "다른 주제로 대화를 이어가시겠어요?",
    "그런 내용보다는 재미있는 이야기를 나눠보는 건 어떨까요?",
    "안전하고 건전한 대화를 나누어요!",
    "다른 질문이 있으시면 언제든 말씀해 주세요.",
];

/// Notice shown instead of a reply when the input is blocked.
pub const DEFAULT_BLOCKED_NOTICE: &str = "부적절한 입력이 감지되었습니다.";

/// Notice returned for empty input.
pub const DEFAULT_EMPTY_NOTICE: &str = "입력이 비어 있습니다.";

/// Word lists, patterns and canned texts used by [`ContentFilter`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Case-insensitive substrings that mark text as inappropriate.
    pub words: Vec<String>,
    /// Regular expressions, matched case-insensitively.
    pub patterns: Vec<String>,
    /// Opening and closing tags of reasoning segments removed from replies.
    pub reasoning_tags: Vec<(String, String)>,
    /// Replies substituted for inappropriate model output.
    pub safe_responses: Vec<String>,
    pub blocked_notice: String,
    pub empty_notice: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            words: DEFAULT_WORDS.iter().map(|w| w.to_string()).collect(),
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            reasoning_tags: DEFAULT_REASONING_TAGS
                .iter()
                .map(|(open, close)| (open.to_string(), close.to_string()))
                .collect(),
            safe_responses: DEFAULT_SAFE_RESPONSES.iter().map(|r| r.to_string()).collect(),
            blocked_notice: DEFAULT_BLOCKED_NOTICE.to_string(),
            empty_notice: DEFAULT_EMPTY_NOTICE.to_string(),
        }
    }
}

/// Audience rating. Recorded only; filtering does not depend on it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgeRating {
    #[default]
    Everyone,
    Teen,
    Mature,
    AdultsOnly,
}

impl AgeRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRating::Everyone => "E",
            AgeRating::Teen => "T",
            AgeRating::Mature => "M",
            AgeRating::AdultsOnly => "AO",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => AgeRating::Teen,
            2 => AgeRating::Mature,
            3 => AgeRating::AdultsOnly,
            _ => AgeRating::Everyone,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AgeRating::Everyone => 0,
            AgeRating::Teen => 1,
            AgeRating::Mature => 2,
            AgeRating::AdultsOnly => 3,
        }
    }
}

impl fmt::Display for AgeRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "E" => Ok(AgeRating::Everyone),
            "T" => Ok(AgeRating::Teen),
            "M" => Ok(AgeRating::Mature),
            "AO" => Ok(AgeRating::AdultsOnly),
            other => Err(format!("unknown age rating: {}", other)),
        }
    }
}

/// Outcome of filtering user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    pub is_appropriate: bool,
    /// Trimmed input when appropriate, otherwise the notice to display.
    pub filtered_text: String,
}

/// Text classifier and redactor.
///
/// Immutable after construction apart from the age rating, so one instance
/// can be shared across concurrent requests.
#[derive(Debug)]
pub struct ContentFilter {
    words: Vec<String>,
    patterns: Vec<Regex>,
    /// Three or more consecutive line breaks.
    blank_run: Regex,
    reasoning_tags: Vec<(String, String)>,
    safe_responses: Vec<String>,
    blocked_notice: String,
    empty_notice: String,
    age_rating: AtomicU8,
}

impl ContentFilter {
    /// Compile a filter. Fails if a pattern is not a valid regex or a
    /// reasoning tag is empty.
    pub fn new(config: FilterConfig) -> Result<Self, ChatError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        if config
            .reasoning_tags
            .iter()
            .any(|(open, close)| open.is_empty() || close.is_empty())
        {
            return Err(ChatError::InvalidOptions(
                "reasoning tags must not be empty".to_string(),
            ));
        }

        Ok(Self {
            words: config
                .words
                .into_iter()
                .filter(|w| !w.is_empty())
                .map(|w| w.to_lowercase())
                .collect(),
            patterns,
            blank_run: Regex::new(r"\n(?:[ \t]*\n){2,}")?,
            reasoning_tags: config.reasoning_tags,
            safe_responses: config.safe_responses,
            blocked_notice: config.blocked_notice,
            empty_notice: config.empty_notice,
            age_rating: AtomicU8::new(AgeRating::default().as_u8()),
        })
    }

    /// Whether the text contains a blocklisted word or matches a pattern.
    pub fn is_inappropriate(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        let lower = text.to_lowercase();
        self.words.iter().any(|w| lower.contains(w.as_str()))
            || self.patterns.iter().any(|p| p.is_match(text))
    }

    /// Classify user input. Empty or missing input is never appropriate.
    pub fn filter_user_input<'a>(&self, text: impl Into<Option<&'a str>>) -> FilterResult {
        let text = match text.into().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => {
                return FilterResult {
                    is_appropriate: false,
                    filtered_text: self.empty_notice.clone(),
                }
            }
        };

        if self.is_inappropriate(text) {
            self.log_filtered_content(text, "inappropriate user input");
            return FilterResult {
                is_appropriate: false,
                filtered_text: self.blocked_notice.clone(),
            };
        }

        FilterResult {
            is_appropriate: true,
            filtered_text: text.to_string(),
        }
    }

    /// Clean a model reply for display.
    ///
    /// Reasoning segments are removed with their contents, runs of blank lines
    /// collapse to one, and the result is trimmed. Empty or still
    /// inappropriate text is replaced with a canned safe response.
    pub fn filter_response<'a>(&self, text: impl Into<Option<&'a str>>) -> String {
        let Some(text) = text.into() else {
            return self.safe_response();
        };

        let stripped = self.strip_reasoning(text);
        let cleaned = self.blank_run.replace_all(&stripped, "\n\n");
        let cleaned = cleaned.trim();

        if cleaned.is_empty() {
            return self.safe_response();
        }
        if self.is_inappropriate(cleaned) {
            self.log_filtered_content(cleaned, "inappropriate model response");
            return self.safe_response();
        }
        cleaned.to_string()
    }

    pub fn set_age_rating(&self, rating: AgeRating) {
        self.age_rating.store(rating.as_u8(), Ordering::Relaxed);
    }

    pub fn age_rating(&self) -> AgeRating {
        AgeRating::from_u8(self.age_rating.load(Ordering::Relaxed))
    }

    pub fn blocked_notice(&self) -> &str {
        &self.blocked_notice
    }

    /// Audit log entry for filtered content.
    pub fn log_filtered_content(&self, original: &str, reason: &str) {
        info!(
            target: "content_filter",
            "Filtered: \"{}\" - Reason: {}",
            excerpt(original, LOG_EXCERPT_CHARS),
            reason
        );
    }

    fn safe_response(&self) -> String {
        self.safe_responses
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| self.blocked_notice.clone())
    }

    fn strip_reasoning(&self, text: &str) -> String {
        let mut out = text.to_string();

        for (open, close) in &self.reasoning_tags {
            while let Some(start) = out.find(open.as_str()) {
                let body = start + open.len();
                match out[body..].find(close.as_str()) {
                    Some(end) => out.replace_range(start..body + end + close.len(), ""),
                    // Unclosed: the reply never left the reasoning block.
                    None => out.truncate(start),
                }
            }

            // Closing tag without an opener: the opener was cut off upstream.
            if let Some(end) = out.rfind(close.as_str()) {
                out.replace_range(..end + close.len(), "");
            }
        }

        out
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
