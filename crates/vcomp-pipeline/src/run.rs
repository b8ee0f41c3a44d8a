//! The process-level entry point.
//!
//! `run_job` drives one job document through the staged pipeline and
//! guarantees scope release on every path: success, failure and
//! cancellation all end with the job's temp directory gone.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vcomp_models::{Job, JobId};

use crate::context::PipelineContext;
use crate::error::{ErrorKind, PipelineError};
use crate::logging::JobLogger;
use crate::metrics::{MetricsCollector, MetricsSummary, WarningRecord};
use crate::scope::ResourceScope;
use crate::settings::Settings;
use crate::stages::{build_pipeline, StageServices};

/// Result of a completed job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub job_id: JobId,
    /// URL of the uploaded artifact, when the upload stage ran
    pub url: Option<String>,
    /// Local copy of the final video, kept when no URL was produced
    pub final_path: Option<PathBuf>,
    pub metrics: MetricsSummary,
    pub warnings: Vec<WarningRecord>,
}

/// Run one job document through the pipeline.
///
/// The cancellation token is observed at every suspension point; on
/// cancellation the scope is released, partial intermediates are deleted
/// and the caller receives a `Cancelled` error.
pub async fn run_job(
    settings: Arc<Settings>,
    job_doc: serde_json::Value,
    cancel: CancellationToken,
) -> Result<JobOutput, PipelineError> {
    let job = Job::from_json(&job_doc).map_err(|e| {
        PipelineError::validation(
            "validate",
            format!("job document does not match the schema: {}", e),
        )
    })?;

    let job_id = JobId::new();
    let logger = JobLogger::new(&job_id, "compose");
    logger.log_start(&format!("{} segments", job.segments.len()));

    let metrics = MetricsCollector::new();
    let scope = Arc::new(
        ResourceScope::create(&settings.engine.work_dir, job_id.as_str())?.with_cleanup_retry(
            settings.engine.cleanup_attempts,
            settings.engine.cleanup_backoff,
        ),
    );

    let services = StageServices::build(
        Arc::clone(&settings),
        Arc::clone(&metrics),
        cancel.clone(),
    )?;
    let engine = build_pipeline(&services);

    let mut ctx = PipelineContext::new(job_id.clone(), job, Arc::clone(&scope));
    let mut result = engine.run(&mut ctx).await;

    // Persist the final video outside the scope whenever no URL exists for
    // it: upload disabled, or the upload itself failed.
    let mut final_path = None;
    if ctx.upload_url().is_none() {
        let upload_failed = matches!(
            result.as_ref().err().map(|e| e.kind),
            Some(ErrorKind::Upload)
        );
        if result.is_ok() || upload_failed {
            final_path = persist_final_clip(&settings, &ctx, &job_id).await;
            if let (Err(e), Some(path)) = (&mut result, &final_path) {
                e.message
                    .push_str(&format!(" (local file retained at {})", path.display()));
            }
        }
    }

    // The scope releases on every path; nothing under it survives the job.
    scope.release().await;

    match result {
        Ok(()) => {
            let output = JobOutput {
                job_id,
                url: ctx.upload_url().map(str::to_string),
                final_path,
                metrics: metrics.summary(),
                warnings: metrics.warnings(),
            };
            logger.log_completion(&format!(
                "url={} warnings={}",
                output.url.as_deref().unwrap_or("-"),
                output.warnings.len()
            ));
            Ok(output)
        }
        Err(e) => {
            logger.log_error(&format!("{} ({})", e.message, e.kind));
            Err(e)
        }
    }
}

/// Run a job with settings and logging taken from the environment.
pub async fn run_job_from_env(
    job_doc: serde_json::Value,
    cancel: CancellationToken,
) -> Result<JobOutput, PipelineError> {
    dotenvy::dotenv().ok();
    crate::logging::init_logging();
    run_job(Arc::new(Settings::from_env()), job_doc, cancel).await
}

/// Copy the final clip out of the scope before release.
async fn persist_final_clip(
    settings: &Settings,
    ctx: &PipelineContext,
    job_id: &JobId,
) -> Option<PathBuf> {
    let source = ctx.final_clip_path()?;
    if !source.is_file() {
        return None;
    }

    let output_dir = PathBuf::from(&settings.engine.work_dir).join("output");
    if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
        tracing::warn!(error = %e, "Could not create output directory, final clip not retained");
        return None;
    }

    let target = output_dir.join(format!("final_{}.mp4", job_id));
    match tokio::fs::copy(source, &target).await {
        Ok(_) => {
            info!(path = %target.display(), "Final video retained locally");
            Some(target)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not retain final clip");
            None
        }
    }
}
