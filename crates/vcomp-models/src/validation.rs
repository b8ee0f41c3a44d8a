//! Structural and semantic validation of the job document.
//!
//! Validation runs in two phases. The structural phase checks the shape of
//! the document: required keys, enums, non-negative durations, unique
//! segment IDs, at-least-one-visual. The semantic phase checks rules that
//! relate fields to each other: URL syntax, transition sums against the
//! segment duration bound, overlay windows inside the segment. Errors are
//! fatal; warnings are surfaced but non-fatal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::job::{Job, Segment};

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidationIssue {
    /// Stable machine-readable code, e.g. `segment_id_duplicate`
    pub code: String,

    /// Human-readable description
    pub message: String,

    /// Offending segment, when applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            segment_id: None,
        }
    }

    pub fn for_segment(mut self, segment_id: impl Into<String>) -> Self {
        self.segment_id = Some(segment_id.into());
        self
    }
}

/// Outcome of validating a job document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// True when no fatal findings were recorded.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    fn warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// One-line summary of all errors, for failure messages.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match &e.segment_id {
                Some(id) => format!("[{}] {}: {}", id, e.code, e.message),
                None => format!("{}: {}", e.code, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Bounds the semantic phase needs that are not part of the document.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Duration assumed for an image-only segment without voice-over
    pub default_image_duration: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            default_image_duration: 5.0,
        }
    }
}

/// Validate a job document. Structural findings first, then semantic.
pub fn validate_job(job: &Job, limits: &ValidationLimits) -> ValidationResult {
    let mut result = ValidationResult::default();

    validate_structure(job, &mut result);
    // Semantic checks assume a structurally coherent document.
    if result.ok() {
        validate_semantics(job, limits, &mut result);
    }

    result
}

fn validate_structure(job: &Job, result: &mut ValidationResult) {
    if job.segments.is_empty() {
        result.error(ValidationIssue::new(
            "segments_empty",
            "job must contain at least one segment",
        ));
        return;
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for segment in &job.segments {
        if segment.id.trim().is_empty() {
            result.error(ValidationIssue::new(
                "segment_id_empty",
                "segment id must be a non-empty string",
            ));
            continue;
        }
        if !seen_ids.insert(&segment.id) {
            result.error(
                ValidationIssue::new(
                    "segment_id_duplicate",
                    format!("segment id '{}' appears more than once", segment.id),
                )
                .for_segment(&segment.id),
            );
        }

        validate_segment_structure(segment, result);
    }

    if let Some(bgm) = &job.background_music {
        if let Some(volume) = bgm.volume {
            if !(0.0..=2.0).contains(&volume) {
                result.error(ValidationIssue::new(
                    "bgm_volume_out_of_range",
                    format!("background music volume {} outside 0..=2", volume),
                ));
            }
        }
        if bgm.fade_in.unwrap_or(0.0) < 0.0 || bgm.fade_out.unwrap_or(0.0) < 0.0 {
            result.error(ValidationIssue::new(
                "bgm_fade_negative",
                "background music fades must be >= 0",
            ));
        }
    }
}

fn validate_segment_structure(segment: &Segment, result: &mut ValidationResult) {
    if segment.visual().is_none() {
        result.error(
            ValidationIssue::new(
                "segment_visual_missing",
                "segment requires an image or a video",
            )
            .for_segment(&segment.id),
        );
    }
    if segment.video.is_some() && segment.image.is_some() {
        result.warning(
            ValidationIssue::new(
                "segment_visual_ambiguous",
                "segment has both image and video; video wins",
            )
            .for_segment(&segment.id),
        );
    }

    if let Some(voice) = &segment.voice_over {
        if voice.start_delay < 0.0 || voice.end_delay < 0.0 {
            result.error(
                ValidationIssue::new("voice_delay_negative", "voice-over delays must be >= 0")
                    .for_segment(&segment.id),
            );
        }
    }

    for (i, overlay) in segment.text_over.iter().enumerate() {
        if overlay.text.trim().is_empty() {
            result.error(
                ValidationIssue::new("overlay_text_empty", format!("text_over[{}] is empty", i))
                    .for_segment(&segment.id),
            );
        }
        if overlay.start < 0.0 || overlay.end <= overlay.start {
            result.error(
                ValidationIssue::new(
                    "overlay_window_invalid",
                    format!(
                        "text_over[{}] window [{}, {}] must satisfy end > start >= 0",
                        i, overlay.start, overlay.end
                    ),
                )
                .for_segment(&segment.id),
            );
        }
    }

    for (label, transition) in [
        ("transition_in", &segment.transition_in),
        ("transition_out", &segment.transition_out),
    ] {
        if let Some(t) = transition {
            if t.duration < 0.0 {
                result.error(
                    ValidationIssue::new(
                        "transition_duration_negative",
                        format!("{} duration must be >= 0", label),
                    )
                    .for_segment(&segment.id),
                );
            }
            if t.kind.is_degraded() {
                result.warning(
                    ValidationIssue::new(
                        "transition_unsupported",
                        format!("{} effect '{}' degrades to fade", label, t.kind),
                    )
                    .for_segment(&segment.id),
                );
            }
        }
    }
}

fn validate_semantics(job: &Job, limits: &ValidationLimits, result: &mut ValidationResult) {
    for segment in &job.segments {
        validate_urls(segment, result);

        // The content duration bound is only computable before download for
        // image-only segments without voice-over.
        let bound = content_duration_bound(segment, limits);

        let (tin, tout) = segment.transition_padding();
        if let Some(bound) = bound {
            if tin + tout > bound {
                result.error(
                    ValidationIssue::new(
                        "transition_exceeds_duration",
                        format!(
                            "transition durations {:.2}s exceed segment duration bound {:.2}s",
                            tin + tout,
                            bound
                        ),
                    )
                    .for_segment(&segment.id),
                );
            }

            for (i, overlay) in segment.text_over.iter().enumerate() {
                if overlay.end > bound + tin + tout {
                    result.warning(
                        ValidationIssue::new(
                            "overlay_outside_segment",
                            format!(
                                "text_over[{}] ends at {:.2}s, beyond segment duration {:.2}s",
                                i,
                                overlay.end,
                                bound + tin + tout
                            ),
                        )
                        .for_segment(&segment.id),
                    );
                }
            }
        }
    }

    if let Some(bgm) = &job.background_music {
        check_url(&bgm.audio.url, "background_music", None, result);
    }
}

fn validate_urls(segment: &Segment, result: &mut ValidationResult) {
    if let Some(image) = &segment.image {
        check_url(&image.url, "image", Some(&segment.id), result);
    }
    if let Some(video) = &segment.video {
        check_url(&video.url, "video", Some(&segment.id), result);
    }
    if let Some(voice) = &segment.voice_over {
        check_url(&voice.audio.url, "voice_over", Some(&segment.id), result);
    }
}

fn check_url(raw: &str, field: &str, segment_id: Option<&str>, result: &mut ValidationResult) {
    if raw.trim().is_empty() {
        let mut issue =
            ValidationIssue::new("asset_url_empty", format!("{} url is empty", field));
        if let Some(id) = segment_id {
            issue = issue.for_segment(id);
        }
        result.error(issue);
        return;
    }

    // Local paths are checked for existence by the downloader, not here.
    if raw.starts_with("http://") || raw.starts_with("https://") {
        if url::Url::parse(raw).is_err() {
            let mut issue = ValidationIssue::new(
                "asset_url_invalid",
                format!("{} url '{}' is not a valid URL", field, raw),
            );
            if let Some(id) = segment_id {
                issue = issue.for_segment(id);
            }
            result.error(issue);
        }
    }
}

/// Pre-download duration bound for a segment, when computable.
fn content_duration_bound(segment: &Segment, limits: &ValidationLimits) -> Option<f64> {
    if segment.voice_over.is_some() || segment.video.is_some() {
        // Bound depends on probed media duration, checked at render time.
        None
    } else {
        Some(limits.default_image_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn job_from(doc: serde_json::Value) -> Job {
        Job::from_json(&doc).unwrap()
    }

    #[test]
    fn test_valid_minimal_job() {
        let job = job_from(serde_json::json!({
            "segments": [{
                "id": "only",
                "image": { "url": "http://ex/a.jpg" },
                "voice_over": { "url": "http://ex/a.mp3" }
            }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result.ok(), "{}", result.error_summary());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_empty_segments_rejected() {
        let job = job_from(serde_json::json!({ "segments": [] }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(!result.ok());
        assert_eq!(result.errors[0].code, "segments_empty");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let job = job_from(serde_json::json!({
            "segments": [
                { "id": "a", "image": { "url": "http://ex/1.jpg" } },
                { "id": "a", "image": { "url": "http://ex/2.jpg" } }
            ]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "segment_id_duplicate"));
    }

    #[test]
    fn test_missing_visual_rejected() {
        let job = job_from(serde_json::json!({
            "segments": [{ "id": "a", "voice_over": { "url": "http://ex/a.mp3" } }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "segment_visual_missing"));
    }

    #[test]
    fn test_both_visuals_is_warning() {
        let job = job_from(serde_json::json!({
            "segments": [{
                "id": "a",
                "image": { "url": "http://ex/a.jpg" },
                "video": { "url": "http://ex/a.mp4" }
            }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result.ok());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == "segment_visual_ambiguous"));
    }

    #[test]
    fn test_overlay_window_rules() {
        let job = job_from(serde_json::json!({
            "segments": [{
                "id": "a",
                "image": { "url": "http://ex/a.jpg" },
                "text_over": [{ "text": "hi", "start": 2.0, "end": 1.0 }]
            }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "overlay_window_invalid"));
    }

    #[test]
    fn test_bgm_volume_range() {
        let job = job_from(serde_json::json!({
            "segments": [{ "id": "a", "image": { "url": "http://ex/a.jpg" } }],
            "background_music": { "url": "http://ex/b.mp3", "volume": 2.5 }
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "bgm_volume_out_of_range"));
    }

    #[test]
    fn test_unsupported_transition_warns_not_rejects() {
        let job = job_from(serde_json::json!({
            "segments": [{
                "id": "a",
                "image": { "url": "http://ex/a.jpg" },
                "transition_in": { "type": "dissolve", "duration": 0.5 }
            }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result.ok());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == "transition_unsupported"));
    }

    #[test]
    fn test_transition_sum_exceeds_image_bound() {
        let job = job_from(serde_json::json!({
            "segments": [{
                "id": "a",
                "image": { "url": "http://ex/a.jpg" },
                "transition_in": { "type": "fade", "duration": 3.0 },
                "transition_out": { "type": "fade", "duration": 3.0 }
            }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "transition_exceeds_duration"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let job = job_from(serde_json::json!({
            "segments": [{ "id": "a", "image": { "url": "http://exa mple.com/a.jpg" } }]
        }));
        let result = validate_job(&job, &ValidationLimits::default());
        assert!(result.errors.iter().any(|e| e.code == "asset_url_invalid"));
    }
}
