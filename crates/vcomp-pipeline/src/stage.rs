//! Stage descriptors.

use futures::future::BoxFuture;
use std::fmt;

use crate::context::{ContextKey, PipelineContext};
use crate::error::PipelineResult;

/// What the engine does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the pipeline (default)
    Abort,
    /// Record a warning and continue with the next stage
    Skip,
    /// Run the named fallback stage, then continue
    FallbackTo(&'static str),
}

type StageFn =
    Box<dyn for<'a> Fn(&'a mut PipelineContext) -> BoxFuture<'a, PipelineResult<()>> + Send + Sync>;
type ConditionFn = Box<dyn Fn(&PipelineContext) -> bool + Send + Sync>;

/// A named unit of pipeline work with declared inputs and outputs.
pub struct Stage {
    pub name: &'static str,
    pub required: Vec<ContextKey>,
    pub produces: Vec<ContextKey>,
    pub when_fails: FailurePolicy,
    condition: Option<ConditionFn>,
    run: StageFn,
}

impl Stage {
    /// Create a stage from its async body.
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: for<'a> Fn(&'a mut PipelineContext) -> BoxFuture<'a, PipelineResult<()>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            required: Vec::new(),
            produces: Vec::new(),
            when_fails: FailurePolicy::Abort,
            condition: None,
            run: Box::new(run),
        }
    }

    /// Context keys that must be present before the stage runs.
    pub fn requires(mut self, keys: &[ContextKey]) -> Self {
        self.required = keys.to_vec();
        self
    }

    /// Context keys the stage is allowed (and expected) to write.
    pub fn produces(mut self, keys: &[ContextKey]) -> Self {
        self.produces = keys.to_vec();
        self
    }

    /// Skip the stage when the predicate is false.
    pub fn condition<C>(mut self, condition: C) -> Self
    where
        C: Fn(&PipelineContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Failure policy; `Abort` unless overridden.
    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.when_fails = policy;
        self
    }

    /// True when the stage should run for this context.
    pub fn should_run(&self, ctx: &PipelineContext) -> bool {
        self.condition.as_ref().map(|c| c(ctx)).unwrap_or(true)
    }

    pub(crate) async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        (self.run)(ctx).await
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("produces", &self.produces)
            .field("when_fails", &self.when_fails)
            .finish()
    }
}
