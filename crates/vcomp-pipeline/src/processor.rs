//! Processor framework.
//!
//! A processor is one unit of work with a single `process` operation,
//! tagged CPU-bound or I/O-bound. The framework's only job is wrapping
//! every invocation in a metric span and keeping errors typed. The
//! `BatchProcessor` fans a per-item processor out under a concurrency
//! limit, preserving input order and isolating per-item failures.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::MetricsCollector;

/// Scheduling hint for a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Synchronous work, dispatched to the blocking pool
    Cpu,
    /// Cooperatively concurrent work (network, subprocess)
    Io,
}

/// One unit of work.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Metric and diagnostic name.
    fn name(&self) -> &'static str;

    /// Scheduling hint.
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Io
    }

    async fn process(&self, input: Self::Input) -> PipelineResult<Self::Output>;
}

/// Synchronous, CPU-bound unit of work.
pub trait SyncProcessor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    fn process(&self, input: Self::Input) -> PipelineResult<Self::Output>;
}

/// Adapter running a `SyncProcessor` on the blocking pool.
pub struct CpuBound<P>(pub Arc<P>);

#[async_trait]
impl<P: SyncProcessor> Processor for CpuBound<P> {
    type Input = P::Input;
    type Output = P::Output;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Cpu
    }

    async fn process(&self, input: Self::Input) -> PipelineResult<Self::Output> {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || inner.process(input))
            .await
            .map_err(|e| {
                PipelineError::processing("processor", format!("blocking task panicked: {}", e))
            })?
    }
}

/// Outcome of one batch item, in input order.
#[derive(Debug)]
pub struct ItemResult<T> {
    pub index: usize,
    pub result: PipelineResult<T>,
}

/// Results of a batch run.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub items: Vec<ItemResult<T>>,
}

impl<T> BatchOutcome<T> {
    /// Successful outputs in input order.
    pub fn successes(self) -> Vec<T> {
        self.items
            .into_iter()
            .filter_map(|item| item.result.ok())
            .collect()
    }

    /// References to the per-item failures.
    pub fn failures(&self) -> Vec<(usize, &PipelineError)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().err().map(|e| (item.index, e)))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// The first cancellation among the failures, if any.
    pub fn cancellation(&self) -> Option<&PipelineError> {
        self.items
            .iter()
            .filter_map(|i| i.result.as_ref().err())
            .find(|e| e.is_cancelled())
    }
}

/// Fans a per-item processor out with a bounded concurrency.
pub struct BatchProcessor<P: Processor> {
    inner: Arc<P>,
    concurrency: usize,
    strict: bool,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
}

impl<P: Processor> BatchProcessor<P> {
    pub fn new(
        inner: Arc<P>,
        concurrency: usize,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            concurrency: concurrency.max(1),
            strict: false,
            metrics,
            cancel,
        }
    }

    /// Fail the whole batch on the first item failure.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Run all inputs, returning per-item results in input order.
    ///
    /// The batch itself only fails when every item failed, when strict mode
    /// is set and any item failed, or on cancellation.
    pub async fn run(&self, inputs: Vec<P::Input>) -> PipelineResult<BatchOutcome<P::Output>> {
        let total = inputs.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let futures = inputs.into_iter().enumerate().map(|(index, input)| {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            let metrics = Arc::clone(&self.metrics);
            let cancel = self.cancel.clone();

            async move {
                // The semaphore is never closed; hold the permit for the
                // duration of the item.
                let _permit = semaphore.acquire_owned().await.ok();
                if cancel.is_cancelled() {
                    return ItemResult {
                        index,
                        result: Err(PipelineError::cancelled(inner.name())),
                    };
                }

                let span = metrics.start_span(inner.name());
                let result = inner.process(input).await;
                match &result {
                    Ok(_) => span.succeed(),
                    Err(e) => span.fail(e.kind.as_str()),
                }
                ItemResult { index, result }
            }
        });

        // join_all preserves input order in its output.
        let items = join_all(futures).await;
        let outcome = BatchOutcome { items };

        if let Some(cancelled) = outcome.cancellation() {
            return Err(PipelineError::cancelled(cancelled.stage.clone()));
        }

        let failed = outcome.failed();
        if total > 0 && failed == total {
            return Err(batch_failure(self.inner.name(), &outcome));
        }
        if self.strict && failed > 0 {
            return Err(batch_failure(self.inner.name(), &outcome));
        }

        Ok(outcome)
    }
}

/// Aggregate diagnostic listing every failed item and its kind.
fn batch_failure<T>(name: &str, outcome: &BatchOutcome<T>) -> PipelineError {
    let details: Vec<String> = outcome
        .failures()
        .iter()
        .map(|(index, error)| {
            format!(
                "item {} ({}{}): {}",
                index,
                error.kind,
                error
                    .segment_id
                    .as_deref()
                    .map(|id| format!(", segment {}", id))
                    .unwrap_or_default(),
                error.message
            )
        })
        .collect();

    PipelineError::processing(
        name,
        format!(
            "{}/{} items failed: {}",
            outcome.failed(),
            outcome.items.len(),
            details.join("; ")
        ),
    )
}
