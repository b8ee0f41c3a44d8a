//! The pipeline engine.
//!
//! Runs an ordered list of stages over one context. Before each stage the
//! engine checks cancellation, the stage condition and the declared input
//! keys; around each stage it opens a metric span; after a success it
//! verifies the declared outputs were produced. Failure handling follows
//! the stage's policy, except cancellation, which always aborts.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::PipelineContext;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::metrics::MetricsCollector;
use crate::stage::{FailurePolicy, Stage};

/// Ordered stage list plus registered fallback stages.
pub struct PipelineEngine {
    stages: Vec<Stage>,
    fallbacks: Vec<Stage>,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
}

impl PipelineEngine {
    pub fn new(metrics: Arc<MetricsCollector>, cancel: CancellationToken) -> Self {
        Self {
            stages: Vec::new(),
            fallbacks: Vec::new(),
            metrics,
            cancel,
        }
    }

    /// Append a stage to the run order.
    pub fn add_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Register a stage reachable only through `FailurePolicy::FallbackTo`.
    pub fn add_fallback(mut self, stage: Stage) -> Self {
        self.fallbacks.push(stage);
        self
    }

    /// Run all stages in order. The caller owns scope release.
    pub async fn run(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        for stage in &self.stages {
            if self.cancel.is_cancelled() {
                info!(job_id = %ctx.job_id, stage = stage.name, "Pipeline cancelled");
                return Err(PipelineError::cancelled(stage.name));
            }

            if !stage.should_run(ctx) {
                debug!(job_id = %ctx.job_id, stage = stage.name, "Stage condition false, skipping");
                continue;
            }

            match self.run_stage(stage, ctx).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match stage.when_fails {
                    FailurePolicy::Abort => return Err(e),
                    FailurePolicy::Skip => {
                        self.metrics.warn(
                            "StageSkipped",
                            e.segment_id.as_deref(),
                            format!("stage '{}' failed and was skipped: {}", stage.name, e.message),
                        );
                    }
                    FailurePolicy::FallbackTo(fallback_name) => {
                        self.metrics.warn(
                            "StageFellBack",
                            e.segment_id.as_deref(),
                            format!(
                                "stage '{}' failed, falling back to '{}': {}",
                                stage.name, fallback_name, e.message
                            ),
                        );
                        let fallback = self
                            .fallbacks
                            .iter()
                            .find(|s| s.name == fallback_name)
                            .ok_or_else(|| {
                                PipelineError::new(
                                    stage.name,
                                    ErrorKind::Processing,
                                    format!("fallback stage '{}' is not registered", fallback_name),
                                )
                            })?;
                        self.run_stage(fallback, ctx).await?;
                    }
                },
            }
        }

        Ok(())
    }

    async fn run_stage(&self, stage: &Stage, ctx: &mut PipelineContext) -> PipelineResult<()> {
        for key in &stage.required {
            if !ctx.contains(*key) {
                return Err(PipelineError::new(
                    stage.name,
                    ErrorKind::Processing,
                    format!("required input key '{}' missing from context", key),
                ));
            }
        }

        debug!(job_id = %ctx.job_id, stage = stage.name, "Stage starting");
        ctx.enter_stage(stage.name, &stage.produces);
        let mut span = self.metrics.start_span(stage.name);

        let result = stage.execute(ctx).await;
        if let Some(items) = ctx.take_items_processed() {
            span.set_items(items);
        }

        match result {
            Ok(()) => {
                for key in &stage.produces {
                    if !ctx.contains(*key) {
                        span.fail("processing");
                        return Err(PipelineError::new(
                            stage.name,
                            ErrorKind::Processing,
                            format!("stage did not produce declared key '{}'", key),
                        ));
                    }
                }
                debug!(job_id = %ctx.job_id, stage = stage.name, "Stage finished");
                span.succeed();
                Ok(())
            }
            Err(mut e) => {
                // Failures surface under the stage that hosted them, even
                // when an inner processor raised them under its own name.
                e.stage = stage.name.to_string();
                error!(
                    job_id = %ctx.job_id,
                    stage = stage.name,
                    kind = %e.kind,
                    "Stage failed: {}", e.message
                );
                span.fail(e.kind.as_str());
                Err(e)
            }
        }
    }
}
