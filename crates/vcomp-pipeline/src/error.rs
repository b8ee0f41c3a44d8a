//! Pipeline error types.
//!
//! Every stage failure is wrapped into a `PipelineError` carrying the stage
//! name and a closed error kind, so upper layers discriminate failures
//! without string matching. The original cause is preserved as a source.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Schema or semantic rule violation
    Validation,
    /// Required asset missing or unreadable after download
    Asset,
    /// Transient network or HTTP error while fetching
    Download,
    /// Failure inside a processor
    Processing,
    /// Final join failed
    Concatenation,
    /// Blob sink failure after retries
    Upload,
    /// Scope setup or teardown failure
    Resource,
    /// A bounded suspension exceeded its deadline
    Timeout,
    /// Cooperative cancellation observed
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Asset => "asset",
            ErrorKind::Download => "download",
            ErrorKind::Processing => "processing",
            ErrorKind::Concatenation => "concatenation",
            ErrorKind::Upload => "upload",
            ErrorKind::Resource => "resource",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure with its kind and cause chain.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed ({kind}): {message}")]
pub struct PipelineError {
    /// Stage that failed
    pub stage: String,
    /// Failure kind
    pub kind: ErrorKind,
    /// Offending segment, when the failure is segment-scoped
    pub segment_id: Option<String>,
    /// Human-readable description
    pub message: String,
    /// Original cause
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PipelineError {
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            segment_id: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_segment(mut self, segment_id: impl Into<String>) -> Self {
        self.segment_id = Some(segment_id.into());
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn validation(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Validation, message)
    }

    pub fn asset(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Asset, message)
    }

    pub fn processing(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Processing, message)
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Cancelled, "operation cancelled")
    }

    /// Wrap a media error, preserving its cancellation/timeout semantics.
    pub fn from_media(stage: impl Into<String>, err: vcomp_media::MediaError) -> Self {
        let kind = match &err {
            vcomp_media::MediaError::Cancelled => ErrorKind::Cancelled,
            vcomp_media::MediaError::Timeout(_) => ErrorKind::Timeout,
            vcomp_media::MediaError::FileNotFound(_) => ErrorKind::Asset,
            _ => ErrorKind::Processing,
        };
        Self::new(stage, kind, err.to_string()).with_cause(err)
    }

    /// Wrap a storage error as an upload failure.
    pub fn from_storage(stage: impl Into<String>, err: vcomp_storage::StorageError) -> Self {
        Self::new(stage, ErrorKind::Upload, err.to_string()).with_cause(err)
    }

    /// Wrap an alignment error as a processing failure.
    pub fn from_align(stage: impl Into<String>, err: vcomp_align::AlignError) -> Self {
        Self::new(stage, ErrorKind::Processing, err.to_string()).with_cause(err)
    }

    /// True for cancellation, which bypasses every failure policy.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Download | ErrorKind::Upload | ErrorKind::Timeout
        )
    }

    /// User-visible failure object.
    pub fn failure_report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind,
            stage: self.stage.clone(),
            segment_id: self.segment_id.clone(),
            message: self.message.clone(),
            cause_summary: self.cause.as_ref().map(|c| c.to_string()),
        }
    }
}

/// Serializable failure summary handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause_summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping_from_media() {
        let err = PipelineError::from_media("render", vcomp_media::MediaError::Cancelled);
        assert!(err.is_cancelled());

        let err = PipelineError::from_media("render", vcomp_media::MediaError::Timeout(30));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failure_report_round_trip() {
        let err = PipelineError::asset("download", "missing voice-over")
            .with_segment("s3")
            .with_cause(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));

        let report = err.failure_report();
        assert_eq!(report.kind, ErrorKind::Asset);
        assert_eq!(report.stage, "download");
        assert_eq!(report.segment_id.as_deref(), Some("s3"));
        assert_eq!(report.cause_summary.as_deref(), Some("gone"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "asset");
    }

    #[test]
    fn test_cause_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = PipelineError::processing("render", "ffmpeg failed").with_cause(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }
}
