//! Error types for alignment and LLM operations.

use thiserror::Error;

/// Result type for alignment operations.
pub type AlignResult<T> = Result<T, AlignError>;

/// Errors from the forced aligner, the LLM, or span processing.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Aligner request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid aligner response: {0}")]
    InvalidResponse(String),

    #[error("LLM request failed: {0}")]
    LlmFailed(String),

    #[error("LLM output failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("LLM is disabled by configuration")]
    LlmDisabled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlignError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn llm_failed(msg: impl Into<String>) -> Self {
        Self::LlmFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            AlignError::Network(e) => e.is_timeout() || e.is_connect(),
            AlignError::RequestFailed(_) | AlignError::LlmFailed(_) => true,
            _ => false,
        }
    }
}
