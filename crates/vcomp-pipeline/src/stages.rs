//! Stage definitions binding the crates into the pipeline.
//!
//! Each function builds one `Stage` over the shared services. The default
//! order is `validate -> download -> image_auto -> align_text ->
//! render_segments -> concatenate -> upload`, with the optional stages
//! gated by settings flags.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vcomp_align::{
    distribute_uniformly, map_spans_to_words, split_transcript, AlignerClient, AlignerConfig,
    LlmClient, LlmConfig, SpanRules, TimedSpan,
};
use vcomp_media::{Concatenator, SegmentRenderer};
use vcomp_models::{validate_job, AssetKind, IntermediateClip, Segment, TextOverlay};
use vcomp_storage::{final_video_key, StorageClient};

use crate::context::{ContextKey, PipelineContext};
use crate::download::Downloader;
use crate::engine::PipelineEngine;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::image_fix::ImageAutoFixer;
use crate::metrics::MetricsCollector;
use crate::processor::{BatchProcessor, Processor};
use crate::retry::{retry_async, RetryPolicy};
use crate::settings::Settings;
use crate::stage::{FailurePolicy, Stage};

/// Shared services every stage closes over.
pub struct StageServices {
    pub settings: Arc<Settings>,
    pub metrics: Arc<MetricsCollector>,
    pub cancel: CancellationToken,
    pub downloader: Arc<Downloader>,
    pub fixer: Option<Arc<ImageAutoFixer>>,
    pub aligner: Option<Arc<AlignerClient>>,
    pub llm: Option<Arc<LlmClient>>,
    pub renderer: Arc<SegmentRenderer>,
    pub concatenator: Arc<Concatenator>,
}

impl StageServices {
    /// Construct every client the enabled stages need.
    pub fn build(
        settings: Arc<Settings>,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> PipelineResult<Arc<Self>> {
        let downloader = Arc::new(Downloader::new(
            settings.download.clone(),
            settings.ai.image_fix_enabled,
        )?);

        let llm = if settings.ai.enabled {
            let config = LlmConfig {
                endpoint: settings.ai.endpoint.clone(),
                model: settings.ai.model.clone(),
                api_key: settings.ai.api_key.clone(),
                timeout: settings.ai.timeout,
            };
            Some(Arc::new(LlmClient::new(config).map_err(|e| {
                PipelineError::from_align("setup", e)
            })?))
        } else {
            None
        };

        let aligner = if settings.ai.align_enabled {
            let config = AlignerConfig {
                base_url: settings.ai.aligner_endpoint.clone(),
                timeout: settings.ai.aligner_timeout,
                max_retries: 2,
            };
            Some(Arc::new(AlignerClient::new(config).map_err(|e| {
                PipelineError::from_align("setup", e)
            })?))
        } else {
            None
        };

        let fixer = if settings.ai.image_fix_enabled {
            Some(Arc::new(ImageAutoFixer::new(&settings, llm.clone())?))
        } else {
            None
        };

        let renderer = Arc::new(
            SegmentRenderer::new(
                settings.output_format(),
                settings.encoding(),
                settings.text_defaults(),
            )
            .with_default_image_duration(settings.video.default_image_duration)
            .with_min_subprocess_timeout(settings.video.min_subprocess_timeout),
        );

        let concatenator = Arc::new(
            Concatenator::new(settings.output_format(), settings.encoding())
                .with_bgm_defaults(settings.bgm_defaults())
                .with_bgm_loop(settings.audio.bgm_loop)
                .with_min_subprocess_timeout(settings.video.min_subprocess_timeout),
        );

        Ok(Arc::new(Self {
            settings,
            metrics,
            cancel,
            downloader,
            fixer,
            aligner,
            llm,
            renderer,
            concatenator,
        }))
    }
}

/// Assemble the default pipeline over the services.
pub fn build_pipeline(services: &Arc<StageServices>) -> PipelineEngine {
    let engine = PipelineEngine::new(
        Arc::clone(&services.metrics),
        services.cancel.clone(),
    );

    engine
        .add_stage(validate_stage(Arc::clone(services)))
        .add_stage(download_stage(Arc::clone(services)))
        .add_stage(image_auto_stage(Arc::clone(services)))
        .add_stage(align_text_stage(Arc::clone(services)))
        .add_stage(render_segments_stage(Arc::clone(services)))
        .add_stage(concatenate_stage(Arc::clone(services)))
        .add_stage(upload_stage(Arc::clone(services)))
}

/// Structural and semantic validation of the job document.
pub fn validate_stage(sv: Arc<StageServices>) -> Stage {
    Stage::new("validate", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let job = ctx.job()?;
            let segment_count = job.segments.len() as u32;
            let result = validate_job(job, &sv.settings.validation_limits());

            for warning in &result.warnings {
                sv.metrics.warn(
                    "Validation",
                    warning.segment_id.as_deref(),
                    format!("{}: {}", warning.code, warning.message),
                );
            }

            ctx.set_items_processed(segment_count);
            if result.ok() {
                Ok(())
            } else {
                Err(PipelineError::validation("validate", result.error_summary()))
            }
        }
        .boxed()
    })
    .requires(&[ContextKey::Job])
}

/// Materialize every asset reference into the scope.
pub fn download_stage(sv: Arc<StageServices>) -> Stage {
    Stage::new("download", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let mut job = ctx.job()?.clone();
            let scope = Arc::clone(&ctx.scope);
            let outcome = sv
                .downloader
                .resolve_assets(&mut job, &scope, sv.cancel.clone())
                .await?;

            for failure in &outcome.image_failures {
                sv.metrics.warn(
                    "ImageDownloadFailed",
                    failure.segment_id.as_deref(),
                    format!("image '{}' not fetched: {}", failure.url, failure.message),
                );
            }

            ctx.set_items_processed(outcome.fetched);
            ctx.set_downloaded_job(job)
        }
        .boxed()
    })
    .requires(&[ContextKey::Job])
    .produces(&[ContextKey::DownloadedJob])
}

/// Substitute missing or defective segment images.
pub fn image_auto_stage(sv: Arc<StageServices>) -> Stage {
    let enabled = sv.settings.ai.image_fix_enabled;
    Stage::new("image_auto", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let fixer = match &sv.fixer {
                Some(fixer) => Arc::clone(fixer),
                None => return Ok(()),
            };

            let mut job = ctx.downloaded_job()?.clone();
            let scope = Arc::clone(&ctx.scope);

            let downloader = Arc::clone(&sv.downloader);
            let fetch_scope = Arc::clone(&scope);
            let fetch_cancel = sv.cancel.clone();
            let fetch = move |url: String| {
                let downloader = Arc::clone(&downloader);
                let scope = Arc::clone(&fetch_scope);
                let cancel = fetch_cancel.clone();
                async move {
                    downloader
                        .fetch_url(&url, AssetKind::Image, &scope, cancel)
                        .await
                }
            };

            let fixed = fixer
                .fix_job(&mut job, &scope, &sv.metrics, sv.cancel.clone(), fetch)
                .await?;

            ctx.set_items_processed(fixed);
            ctx.set_downloaded_job(job)
        }
        .boxed()
    })
    .requires(&[ContextKey::DownloadedJob])
    .produces(&[ContextKey::DownloadedJob])
    .condition(move |_| enabled)
    .on_failure(FailurePolicy::Skip)
}

/// Turn voice-over transcripts into timed text overlays.
pub fn align_text_stage(sv: Arc<StageServices>) -> Stage {
    let enabled = sv.settings.ai.align_enabled;
    Stage::new("align_text", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let mut job = ctx.downloaded_job()?.clone();
            let mut all_spans: HashMap<String, Vec<TimedSpan>> = HashMap::new();
            let rules = SpanRules::default();
            let mut aligned = 0u32;

            for segment in &mut job.segments {
                if sv.cancel.is_cancelled() {
                    return Err(PipelineError::cancelled("align_text"));
                }
                let Some(spans) = align_segment(&sv, segment, &rules).await else {
                    continue;
                };
                let start_delay = segment
                    .voice_over
                    .as_ref()
                    .map(|v| v.start_delay)
                    .unwrap_or(0.0);

                for span in &spans {
                    segment.text_over.push(TextOverlay::new(
                        span.text.clone(),
                        span.start + start_delay,
                        span.end + start_delay,
                    ));
                }
                all_spans.insert(segment.id.clone(), spans);
                aligned += 1;
            }

            ctx.set_items_processed(aligned);
            ctx.set_text_spans(all_spans)?;
            ctx.set_downloaded_job(job)
        }
        .boxed()
    })
    .requires(&[ContextKey::DownloadedJob])
    .produces(&[ContextKey::TextSpans, ContextKey::DownloadedJob])
    .condition(move |_| enabled)
    .on_failure(FailurePolicy::Skip)
}

/// Produce timed spans for one segment; None when it has no transcript.
///
/// Every remote failure degrades: LLM problems fall back to the
/// deterministic splitter, aligner problems to uniform distribution.
async fn align_segment(
    sv: &StageServices,
    segment: &Segment,
    rules: &SpanRules,
) -> Option<Vec<TimedSpan>> {
    let voice = segment.voice_over.as_ref()?;
    let content = voice.content.as_deref()?.trim();
    if content.is_empty() {
        return None;
    }
    let audio_path = voice.audio.resolved()?;

    let voice_duration = match vcomp_media::get_duration(audio_path).await {
        Ok(duration) if duration > 0.0 => duration,
        Ok(_) => return None,
        Err(e) => {
            sv.metrics.warn(
                "VoiceProbeFailed",
                Some(&segment.id),
                format!("could not probe voice-over duration: {}", e),
            );
            return None;
        }
    };

    let spans = match &sv.llm {
        Some(llm) => match llm.split_spans(content, rules).await {
            Ok(spans) => spans,
            Err(e) => {
                debug!(segment_id = %segment.id, error = %e, "LLM split failed, using rule splitter");
                split_transcript(content, rules)
            }
        },
        None => split_transcript(content, rules),
    };
    if spans.is_empty() {
        return None;
    }

    let timed = match &sv.aligner {
        Some(aligner) => match aligner.align(audio_path, content).await {
            Ok(words) => map_spans_to_words(&spans, &words, voice_duration),
            Err(e) => {
                sv.metrics.warn(
                    "AlignerUnavailable",
                    Some(&segment.id),
                    format!("forced aligner failed, using uniform timing: {}", e),
                );
                distribute_uniformly(&spans, voice_duration, 0.0)
            }
        },
        None => distribute_uniformly(&spans, voice_duration, 0.0),
    };

    Some(timed)
}

/// Per-segment renderer wrapped for the batch framework.
struct RenderProcessor {
    renderer: Arc<SegmentRenderer>,
    out_dir: PathBuf,
    cancel: CancellationToken,
}

#[async_trait]
impl Processor for RenderProcessor {
    type Input = (usize, Segment);
    type Output = IntermediateClip;

    fn name(&self) -> &'static str {
        "render_segment"
    }

    async fn process(&self, (index, segment): Self::Input) -> PipelineResult<IntermediateClip> {
        self.renderer
            .render(&segment, index, &self.out_dir, self.cancel.clone())
            .await
            .map_err(|e| {
                PipelineError::from_media("render_segments", e).with_segment(segment.id.clone())
            })
    }
}

/// Render every segment into a normalized intermediate clip.
pub fn render_segments_stage(sv: Arc<StageServices>) -> Stage {
    Stage::new("render_segments", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let job = ctx.downloaded_job()?.clone();
            let out_dir = ctx.scope.acquire_temp("clips")?;
            let total = job.segments.len();

            let processor = Arc::new(RenderProcessor {
                renderer: Arc::clone(&sv.renderer),
                out_dir,
                cancel: sv.cancel.clone(),
            });
            let batch = BatchProcessor::new(
                processor,
                sv.settings.performance.render_concurrency(),
                Arc::clone(&sv.metrics),
                sv.cancel.clone(),
            )
            .strict(sv.settings.engine.strict_mode);

            let inputs: Vec<(usize, Segment)> =
                job.segments.iter().cloned().enumerate().collect();
            let outcome = batch.run(inputs).await?;

            for (index, error) in outcome.failures() {
                sv.metrics.warn(
                    "SegmentRenderFailed",
                    error.segment_id.as_deref(),
                    format!("segment {} failed to render: {}", index, error.message),
                );
            }

            let clips = outcome.successes();
            info!(
                rendered = clips.len(),
                total = total,
                "Segment rendering finished"
            );
            ctx.set_items_processed(total as u32);
            ctx.set_segment_clips(clips)
        }
        .boxed()
    })
    .requires(&[ContextKey::DownloadedJob])
    .produces(&[ContextKey::SegmentClips])
}

/// Join the intermediate clips and mix background music.
pub fn concatenate_stage(sv: Arc<StageServices>) -> Stage {
    Stage::new("concatenate", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            let clips = ctx.segment_clips()?.to_vec();
            let bgm = ctx.downloaded_job()?.background_music.clone();
            let job_id = ctx.job_id.clone();
            let scope_dir = ctx.scope.dir().to_path_buf();

            let (path, strategy) = sv
                .concatenator
                .concatenate(
                    &clips,
                    bgm.as_ref(),
                    &scope_dir,
                    job_id.as_str(),
                    sv.cancel.clone(),
                )
                .await
                .map_err(|e| match e {
                    vcomp_media::MediaError::Cancelled => PipelineError::cancelled("concatenate"),
                    vcomp_media::MediaError::Timeout(secs) => PipelineError::new(
                        "concatenate",
                        ErrorKind::Timeout,
                        format!("concatenation timed out after {}s", secs),
                    ),
                    other => PipelineError::new(
                        "concatenate",
                        ErrorKind::Concatenation,
                        other.to_string(),
                    )
                    .with_cause(other),
                })?;

            ctx.metadata
                .insert("concat_strategy".to_string(), strategy.as_str().to_string());
            ctx.set_items_processed(clips.len() as u32);
            ctx.set_final_clip_path(path)
        }
        .boxed()
    })
    .requires(&[ContextKey::SegmentClips, ContextKey::DownloadedJob])
    .produces(&[ContextKey::FinalClipPath])
}

/// Push the final artifact to the blob sink.
pub fn upload_stage(sv: Arc<StageServices>) -> Stage {
    let enabled = sv.settings.storage.upload_enabled;
    Stage::new("upload", move |ctx: &mut PipelineContext| {
        let sv = Arc::clone(&sv);
        async move {
            if sv.cancel.is_cancelled() {
                return Err(PipelineError::cancelled("upload"));
            }

            let path = ctx
                .final_clip_path()
                .cloned()
                .ok_or_else(|| {
                    PipelineError::processing("upload", "final clip path missing from context")
                })?;

            let client = StorageClient::from_env()
                .await
                .map_err(|e| PipelineError::from_storage("upload", e))?;
            let key = final_video_key(&sv.settings.storage.key_prefix, ctx.job_id.as_str());

            let policy = RetryPolicy::new("upload")
                .with_max_attempts(sv.settings.storage.max_retries);
            let url = retry_async(
                &policy,
                vcomp_storage::StorageError::is_retryable,
                || client.put(&path, &key, "video/mp4"),
            )
            .await
            .into_result()
            .map_err(|e| PipelineError::from_storage("upload", e))?;

            info!(job_id = %ctx.job_id, url = %url, "Final video uploaded");
            ctx.set_items_processed(1);
            ctx.set_upload_url(url)
        }
        .boxed()
    })
    .requires(&[ContextKey::FinalClipPath])
    .produces(&[ContextKey::UploadUrl])
    .condition(move |_| enabled)
}
