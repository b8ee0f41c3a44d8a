//! Alignment data types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One word with its time range, as returned by the forced aligner.
///
/// Unknown response fields (e.g. `case`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    /// The word as aligned
    pub word: String,
    /// Start time within the audio, seconds
    pub start: f64,
    /// End time within the audio, seconds
    pub end: f64,
}

/// A display-sized transcript span with its resolved time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedSpan {
    /// Span text, 3-7 words, at most 35 characters
    pub text: String,
    /// Window start relative to the voice-over content, seconds
    pub start: f64,
    /// Window end relative to the voice-over content, seconds
    pub end: f64,
}

impl TimedSpan {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Rules every display span must satisfy.
#[derive(Debug, Clone)]
pub struct SpanRules {
    /// Maximum characters per span
    pub max_chars: usize,
    /// Preferred minimum words per span
    pub min_words: usize,
    /// Maximum words per span
    pub max_words: usize,
}

impl Default for SpanRules {
    fn default() -> Self {
        Self {
            max_chars: 35,
            min_words: 2,
            max_words: 7,
        }
    }
}

/// Structured output schema for LLM-assisted span splitting.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpanSplitOutput {
    /// Transcript split into display-sized spans, in order
    pub segments: Vec<String>,
}

/// Structured output schema for LLM-assisted keyword extraction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeywordOutput {
    /// 1-5 short search keywords
    pub keywords: Vec<String>,
}
