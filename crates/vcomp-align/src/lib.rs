//! Transcript alignment for the VidCompose pipeline.
//!
//! This crate provides:
//! - Forced-aligner HTTP client (audio + transcript -> word timestamps)
//! - Optional LLM structured-output client for span splitting and keywords
//! - Deterministic span splitting, validation and repair
//! - Span-to-word mapping with a uniform-distribution fallback

pub mod client;
pub mod error;
pub mod llm;
pub mod mapping;
pub mod splitter;
pub mod types;

pub use client::{AlignerClient, AlignerConfig};
pub use error::{AlignError, AlignResult};
pub use llm::{LlmClient, LlmConfig};
pub use mapping::{distribute_uniformly, map_spans_to_words};
pub use splitter::{repair_spans, spans_conform, split_transcript};
pub use types::{KeywordOutput, SpanRules, SpanSplitOutput, TimedSpan, WordTimestamp};
