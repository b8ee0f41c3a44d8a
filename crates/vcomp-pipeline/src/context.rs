//! Typed pipeline context.
//!
//! Stages communicate through named slots with a closed vocabulary. The
//! engine grants each stage write access to exactly the keys it declared as
//! outputs; any other write is a context violation. This replaces the
//! shared free-form dict the pattern usually degenerates into.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use vcomp_align::TimedSpan;
use vcomp_models::{IntermediateClip, Job, JobId};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::scope::ResourceScope;

/// Closed vocabulary of context keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// The validated job document
    Job,
    /// The job with every asset resolved to a local path
    DownloadedJob,
    /// Per-segment timed text spans produced by alignment
    TextSpans,
    /// Ordered intermediate clips from the renderer
    SegmentClips,
    /// Path of the concatenated final MP4
    FinalClipPath,
    /// URL returned by the uploader
    UploadUrl,
}

impl ContextKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Job => "job",
            ContextKey::DownloadedJob => "downloaded_job",
            ContextKey::TextSpans => "text_spans",
            ContextKey::SegmentClips => "segment_clips",
            ContextKey::FinalClipPath => "final_clip_path",
            ContextKey::UploadUrl => "upload_url",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state passed between stages.
pub struct PipelineContext {
    /// Job identifier
    pub job_id: JobId,
    /// The job's resource scope; owns every file the stages create
    pub scope: Arc<ResourceScope>,
    /// Free-form stage metadata (strategy choices, counters)
    pub metadata: HashMap<String, String>,

    job: Option<Job>,
    downloaded_job: Option<Job>,
    text_spans: Option<HashMap<String, Vec<TimedSpan>>>,
    segment_clips: Option<Vec<IntermediateClip>>,
    final_clip_path: Option<PathBuf>,
    upload_url: Option<String>,

    producers: HashMap<ContextKey, String>,
    current_stage: String,
    allowed_writes: HashSet<ContextKey>,
    items_processed: Option<u32>,
}

impl PipelineContext {
    /// Create a context seeded with the validated job document.
    pub fn new(job_id: JobId, job: Job, scope: Arc<ResourceScope>) -> Self {
        let mut producers = HashMap::new();
        producers.insert(ContextKey::Job, "accept".to_string());

        Self {
            job_id,
            scope,
            metadata: HashMap::new(),
            job: Some(job),
            downloaded_job: None,
            text_spans: None,
            segment_clips: None,
            final_clip_path: None,
            upload_url: None,
            producers,
            current_stage: String::new(),
            allowed_writes: HashSet::new(),
            items_processed: None,
        }
    }

    /// Called by the engine before each stage runs.
    pub(crate) fn enter_stage(&mut self, stage: &str, produces: &[ContextKey]) {
        self.current_stage = stage.to_string();
        self.allowed_writes = produces.iter().copied().collect();
        self.items_processed = None;
    }

    /// Item count reported by the running stage, consumed by the engine.
    pub fn set_items_processed(&mut self, items: u32) {
        self.items_processed = Some(items);
    }

    pub(crate) fn take_items_processed(&mut self) -> Option<u32> {
        self.items_processed.take()
    }

    /// True when a key has been produced.
    pub fn contains(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::Job => self.job.is_some(),
            ContextKey::DownloadedJob => self.downloaded_job.is_some(),
            ContextKey::TextSpans => self.text_spans.is_some(),
            ContextKey::SegmentClips => self.segment_clips.is_some(),
            ContextKey::FinalClipPath => self.final_clip_path.is_some(),
            ContextKey::UploadUrl => self.upload_url.is_some(),
        }
    }

    fn authorize(&mut self, key: ContextKey) -> PipelineResult<()> {
        if !self.allowed_writes.contains(&key) {
            return Err(PipelineError::new(
                self.current_stage.clone(),
                ErrorKind::Processing,
                format!(
                    "stage wrote undeclared context key '{}' (produced by '{}')",
                    key,
                    self.producers
                        .get(&key)
                        .map(String::as_str)
                        .unwrap_or("nobody")
                ),
            ));
        }
        self.producers.insert(key, self.current_stage.clone());
        Ok(())
    }

    fn missing(&self, key: ContextKey) -> PipelineError {
        PipelineError::new(
            self.current_stage.clone(),
            ErrorKind::Processing,
            format!("required context key '{}' is not present", key),
        )
    }

    // --- typed accessors -------------------------------------------------

    pub fn job(&self) -> PipelineResult<&Job> {
        self.job.as_ref().ok_or_else(|| self.missing(ContextKey::Job))
    }

    pub fn set_downloaded_job(&mut self, job: Job) -> PipelineResult<()> {
        self.authorize(ContextKey::DownloadedJob)?;
        self.downloaded_job = Some(job);
        Ok(())
    }

    pub fn downloaded_job(&self) -> PipelineResult<&Job> {
        self.downloaded_job
            .as_ref()
            .ok_or_else(|| self.missing(ContextKey::DownloadedJob))
    }

    /// Mutable access for stages that declared `DownloadedJob` as output.
    pub fn downloaded_job_mut(&mut self) -> PipelineResult<&mut Job> {
        self.authorize(ContextKey::DownloadedJob)?;
        self.downloaded_job
            .as_mut()
            .ok_or_else(|| {
                PipelineError::new(
                    "context",
                    ErrorKind::Processing,
                    "required context key 'downloaded_job' is not present",
                )
            })
    }

    pub fn set_text_spans(&mut self, spans: HashMap<String, Vec<TimedSpan>>) -> PipelineResult<()> {
        self.authorize(ContextKey::TextSpans)?;
        self.text_spans = Some(spans);
        Ok(())
    }

    pub fn text_spans(&self) -> Option<&HashMap<String, Vec<TimedSpan>>> {
        self.text_spans.as_ref()
    }

    pub fn set_segment_clips(&mut self, clips: Vec<IntermediateClip>) -> PipelineResult<()> {
        self.authorize(ContextKey::SegmentClips)?;
        self.segment_clips = Some(clips);
        Ok(())
    }

    pub fn segment_clips(&self) -> PipelineResult<&[IntermediateClip]> {
        self.segment_clips
            .as_deref()
            .ok_or_else(|| self.missing(ContextKey::SegmentClips))
    }

    pub fn set_final_clip_path(&mut self, path: PathBuf) -> PipelineResult<()> {
        self.authorize(ContextKey::FinalClipPath)?;
        self.final_clip_path = Some(path);
        Ok(())
    }

    pub fn final_clip_path(&self) -> Option<&PathBuf> {
        self.final_clip_path.as_ref()
    }

    pub fn set_upload_url(&mut self, url: String) -> PipelineResult<()> {
        self.authorize(ContextKey::UploadUrl)?;
        self.upload_url = Some(url);
        Ok(())
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    /// Producer of a key, for diagnostics.
    pub fn producer_of(&self, key: ContextKey) -> Option<&str> {
        self.producers.get(&key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::Job;

    fn test_job() -> Job {
        Job::from_json(&serde_json::json!({
            "segments": [{ "id": "s1", "image": { "url": "http://ex/a.jpg" } }]
        }))
        .unwrap()
    }

    fn test_context() -> PipelineContext {
        // The scope owns a unique subdirectory and deletes it on drop.
        let scope = Arc::new(ResourceScope::create(std::env::temp_dir(), "ctx-test").unwrap());
        PipelineContext::new(JobId::from_string("t"), test_job(), scope)
    }

    #[test]
    fn test_seeded_job_present() {
        let ctx = test_context();
        assert!(ctx.contains(ContextKey::Job));
        assert!(!ctx.contains(ContextKey::DownloadedJob));
        assert_eq!(ctx.producer_of(ContextKey::Job), Some("accept"));
    }

    #[test]
    fn test_declared_write_allowed() {
        let mut ctx = test_context();
        ctx.enter_stage("download", &[ContextKey::DownloadedJob]);
        ctx.set_downloaded_job(test_job()).unwrap();
        assert!(ctx.contains(ContextKey::DownloadedJob));
        assert_eq!(ctx.producer_of(ContextKey::DownloadedJob), Some("download"));
    }

    #[test]
    fn test_undeclared_write_rejected() {
        let mut ctx = test_context();
        ctx.enter_stage("validate", &[]);
        let err = ctx.set_downloaded_job(test_job()).unwrap_err();
        assert!(err.message.contains("undeclared context key"));
        assert_eq!(err.stage, "validate");
    }

    #[test]
    fn test_cross_stage_mutation_rejected() {
        let mut ctx = test_context();
        ctx.enter_stage("download", &[ContextKey::DownloadedJob]);
        ctx.set_downloaded_job(test_job()).unwrap();

        // A later stage without the declaration cannot touch the slot.
        ctx.enter_stage("concatenate", &[ContextKey::FinalClipPath]);
        assert!(ctx.downloaded_job_mut().is_err());
        assert!(ctx.downloaded_job().is_ok());
    }

    #[test]
    fn test_missing_key_error_names_key() {
        let mut ctx = test_context();
        ctx.enter_stage("concatenate", &[]);
        let err = ctx.segment_clips().unwrap_err();
        assert!(err.message.contains("segment_clips"));
    }
}
