//! Staged video-composition pipeline.
//!
//! This crate provides:
//! - Typed settings loaded once from the environment
//! - Per-job resource scopes with deterministic cleanup
//! - A metrics collector with per-stage spans and warnings
//! - The processor framework and batch fan-out
//! - Downloader and image auto-fixer
//! - The stage engine and the `run_job` entry point

pub mod context;
pub mod download;
pub mod engine;
pub mod error;
pub mod image_fix;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod run;
pub mod scope;
pub mod settings;
pub mod stage;
pub mod stages;

pub use context::{ContextKey, PipelineContext};
pub use download::{DownloadOutcome, Downloader};
pub use engine::PipelineEngine;
pub use error::{ErrorKind, FailureReport, PipelineError, PipelineResult};
pub use image_fix::{derive_keywords, ImageAutoFixer, ImageSearchClient};
pub use logging::{init_logging, JobLogger};
pub use metrics::{MetricsCollector, MetricsSummary, StageMetric, WarningRecord};
pub use processor::{BatchOutcome, BatchProcessor, CpuBound, Processor, ProcessorKind, SyncProcessor};
pub use retry::{retry_async, RetryPolicy, RetryResult};
pub use run::{run_job, run_job_from_env, JobOutput};
pub use scope::ResourceScope;
pub use settings::Settings;
pub use stage::{FailurePolicy, Stage};
pub use stages::{build_pipeline, StageServices};
