//! Per-stage metrics collection.
//!
//! The collector records one entry per stage or processor invocation and
//! aggregates them into a summary handed back to the caller. It also emits
//! `metrics` crate counters and histograms so an exporter mounted by the
//! embedding process picks them up. Not on the critical path: a plain
//! mutex-guarded append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// One recorded stage or processor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub items_processed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Non-fatal finding surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningRecord {
    /// Stable kind, e.g. `AlignerUnavailable`, `ImageSubstituted`
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
}

/// Aggregate of all recorded invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_duration_ms_by_stage: HashMap<String, f64>,
}

/// Thread-safe metric sink shared by the engine and batch processors.
#[derive(Default)]
pub struct MetricsCollector {
    records: Mutex<Vec<StageMetric>>,
    warnings: Mutex<Vec<WarningRecord>>,
}

impl MetricsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a span for a stage invocation.
    pub fn start_span(self: &Arc<Self>, stage: impl Into<String>) -> MetricSpan {
        MetricSpan {
            collector: Arc::clone(self),
            stage: stage.into(),
            started_at: Utc::now(),
            start: Instant::now(),
            items_processed: 0,
        }
    }

    /// Record a non-fatal warning.
    pub fn warn(&self, kind: impl Into<String>, segment_id: Option<&str>, message: impl Into<String>) {
        let record = WarningRecord {
            kind: kind.into(),
            message: message.into(),
            segment_id: segment_id.map(str::to_string),
        };
        warn!(
            kind = %record.kind,
            segment_id = record.segment_id.as_deref().unwrap_or("-"),
            "{}", record.message
        );
        metrics::counter!("pipeline_warnings_total", "kind" => record.kind.clone()).increment(1);
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(record);
        }
    }

    fn record(&self, metric: StageMetric) {
        metrics::counter!("pipeline_stage_total", "stage" => metric.stage.clone()).increment(1);
        if !metric.success {
            metrics::counter!(
                "pipeline_stage_failures_total",
                "stage" => metric.stage.clone()
            )
            .increment(1);
        }
        metrics::histogram!(
            "pipeline_stage_duration_seconds",
            "stage" => metric.stage.clone()
        )
        .record(metric.duration_ms as f64 / 1000.0);

        if let Ok(mut records) = self.records.lock() {
            records.push(metric);
        }
    }

    /// Aggregate summary over all recorded invocations.
    pub fn summary(&self) -> MetricsSummary {
        let records = match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return MetricsSummary::default(),
        };

        let mut by_stage: HashMap<String, (u64, usize)> = HashMap::new();
        let mut successful = 0;
        for record in &records {
            let entry = by_stage.entry(record.stage.clone()).or_default();
            entry.0 += record.duration_ms;
            entry.1 += 1;
            if record.success {
                successful += 1;
            }
        }

        MetricsSummary {
            total: records.len(),
            successful,
            failed: records.len() - successful,
            avg_duration_ms_by_stage: by_stage
                .into_iter()
                .map(|(stage, (total_ms, count))| (stage, total_ms as f64 / count as f64))
                .collect(),
        }
    }

    /// All warnings recorded so far, in arrival order.
    pub fn warnings(&self) -> Vec<WarningRecord> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Recorded metrics for a stage, newest last. Test and diagnostics aid.
    pub fn records_for(&self, stage: &str) -> Vec<StageMetric> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.stage == stage)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An open metric span; finishing it records the invocation.
pub struct MetricSpan {
    collector: Arc<MetricsCollector>,
    stage: String,
    started_at: DateTime<Utc>,
    start: Instant,
    items_processed: u32,
}

impl MetricSpan {
    /// Count items handled in this invocation.
    pub fn set_items(&mut self, items: u32) {
        self.items_processed = items;
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record a successful invocation.
    pub fn succeed(self) {
        self.finish(true, None);
    }

    /// Record a failed invocation with its error kind.
    pub fn fail(self, error_kind: &str) {
        self.finish(false, Some(error_kind.to_string()));
    }

    fn finish(self, success: bool, error_kind: Option<String>) {
        let metric = StageMetric {
            stage: self.stage,
            started_at: self.started_at,
            duration_ms: self.start.elapsed().as_millis() as u64,
            success,
            items_processed: self.items_processed,
            error_kind,
        };
        self.collector.record(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_records_success_and_failure() {
        let collector = MetricsCollector::new();

        let mut span = collector.start_span("download");
        span.set_items(3);
        span.succeed();

        let span = collector.start_span("render");
        span.fail("processing");

        let summary = collector.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.avg_duration_ms_by_stage.contains_key("download"));

        let downloads = collector.records_for("download");
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].items_processed, 3);

        let renders = collector.records_for("render");
        assert_eq!(renders[0].error_kind.as_deref(), Some("processing"));
    }

    #[test]
    fn test_warnings_collected() {
        let collector = MetricsCollector::new();
        collector.warn("AlignerUnavailable", Some("s1"), "aligner returned 503");
        collector.warn("ImageSubstituted", None, "placeholder used");

        let warnings = collector.warnings();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].kind, "AlignerUnavailable");
        assert_eq!(warnings[0].segment_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_average_duration_by_stage() {
        let collector = MetricsCollector::new();
        collector.record(StageMetric {
            stage: "render".into(),
            started_at: Utc::now(),
            duration_ms: 100,
            success: true,
            items_processed: 1,
            error_kind: None,
        });
        collector.record(StageMetric {
            stage: "render".into(),
            started_at: Utc::now(),
            duration_ms: 300,
            success: true,
            items_processed: 1,
            error_kind: None,
        });

        let summary = collector.summary();
        assert!((summary.avg_duration_ms_by_stage["render"] - 200.0).abs() < 1e-9);
    }
}
