//! Per-segment rendering into normalized intermediate clips.
//!
//! The renderer composes one segment's visual, voice-over, text overlays
//! and transitions into a single MP4 with the shared `OutputFormat`.
//! Transition timing is additive: head and tail transitions extend the clip
//! and the content is offset by the head duration, so neighboring clips
//! never overlap and concatenation is a pure append.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vcomp_models::{
    AssetKind, EncodingConfig, IntermediateClip, OutputFormat, Segment, Transition,
};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{self, TextDefaults};
use crate::probe;

/// Subprocess timeout safety factor over the expected content duration.
const TIMEOUT_FACTOR: f64 = 10.0;

/// Timing inputs resolved by probing, kept separate so plan construction
/// stays pure and testable.
#[derive(Debug, Clone, Default)]
pub struct ProbedDurations {
    /// Duration of a video visual, when the segment has one
    pub visual: Option<f64>,
    /// Duration of the voice-over audio, when present
    pub voice: Option<f64>,
}

/// Fully resolved render plan for one segment.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    /// Content duration before transitions, seconds
    pub content_duration: f64,
    /// Head transition padding, seconds
    pub head: f64,
    /// Tail transition padding, seconds
    pub tail: f64,
    /// Complete filter_complex expression
    pub filter_complex: String,
    /// A non-cut head transition is baked into the graph
    pub transition_in_applied: bool,
    /// A non-cut tail transition is baked into the graph
    pub transition_out_applied: bool,
    /// Effect names that degraded to plain fade
    pub degraded_effects: Vec<String>,
}

impl RenderPlan {
    /// Total clip duration including transitions, seconds.
    pub fn effective_duration(&self) -> f64 {
        self.head + self.content_duration + self.tail
    }
}

/// Renders one segment into a normalized intermediate MP4.
#[derive(Debug, Clone)]
pub struct SegmentRenderer {
    format: OutputFormat,
    encoding: EncodingConfig,
    text: TextDefaults,
    default_image_duration: f64,
    min_subprocess_timeout: Duration,
}

impl SegmentRenderer {
    pub fn new(format: OutputFormat, encoding: EncodingConfig, text: TextDefaults) -> Self {
        Self {
            format,
            encoding,
            text,
            default_image_duration: 5.0,
            min_subprocess_timeout: Duration::from_secs(60),
        }
    }

    /// Duration used for image-only segments without voice-over.
    pub fn with_default_image_duration(mut self, seconds: f64) -> Self {
        self.default_image_duration = seconds;
        self
    }

    /// Floor for the per-subprocess timeout.
    pub fn with_min_subprocess_timeout(mut self, timeout: Duration) -> Self {
        self.min_subprocess_timeout = timeout;
        self
    }

    /// Render a segment into `out_dir`, returning the intermediate clip.
    pub async fn render(
        &self,
        segment: &Segment,
        index: usize,
        out_dir: &Path,
        cancel: CancellationToken,
    ) -> MediaResult<IntermediateClip> {
        let (kind, visual_path) = self.resolve_visual(segment)?;
        let voice_path = self.resolve_voice(segment)?;

        let mut durations = ProbedDurations::default();
        if kind == AssetKind::Video {
            durations.visual = Some(probe::probe_media(&visual_path).await?.duration);
        }
        if let Some(path) = &voice_path {
            let info = probe::probe_media(path).await?;
            if !info.has_audio() {
                return Err(MediaError::invalid_media(format!(
                    "voice-over {} has no audio stream",
                    path.display()
                )));
            }
            durations.voice = Some(info.duration);
        }

        let plan = self.plan(segment, kind, &durations)?;
        for name in &plan.degraded_effects {
            warn!(
                segment_id = %segment.id,
                effect = %name,
                "Unsupported transition effect degraded to fade"
            );
            metrics::counter!("render_transition_degraded_total").increment(1);
        }

        let output = out_dir.join(format!("seg_{:03}_{}.mp4", index, safe_id(&segment.id)));
        let cmd = self.build_command(&plan, kind, &visual_path, voice_path.as_deref(), &output);

        let timeout_secs =
            (plan.effective_duration() * TIMEOUT_FACTOR).max(self.min_subprocess_timeout.as_secs_f64());
        let runner = FfmpegRunner::new()
            .with_cancel(cancel)
            .with_timeout(Duration::from_secs_f64(timeout_secs));

        debug!(
            segment_id = %segment.id,
            duration = plan.effective_duration(),
            filter = %plan.filter_complex,
            "Rendering segment"
        );
        let progress_id = segment.id.clone();
        runner
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    segment_id = %progress_id,
                    out_time_s = progress.out_time_secs(),
                    fps = progress.fps,
                    speed = progress.speed,
                    "Render progress"
                );
            })
            .await?;

        info!(
            segment_id = %segment.id,
            index = index,
            duration = plan.effective_duration(),
            output = %output.display(),
            "Segment rendered"
        );

        Ok(IntermediateClip {
            index,
            segment_id: segment.id.clone(),
            path: output,
            duration_s: plan.effective_duration(),
            has_audio: voice_path.is_some(),
            transition_in_applied: plan.transition_in_applied,
            transition_out_applied: plan.transition_out_applied,
        })
    }

    /// Build the render plan for a segment. Pure given probed durations.
    pub fn plan(
        &self,
        segment: &Segment,
        kind: AssetKind,
        durations: &ProbedDurations,
    ) -> MediaResult<RenderPlan> {
        let content_duration = self.content_duration(segment, kind, durations);
        let head = transition_padding(&segment.transition_in);
        let tail = transition_padding(&segment.transition_out);
        let effective = head + content_duration + tail;

        let mut chains: Vec<String> = Vec::new();
        chains.push(self.video_chain(segment, kind, durations, content_duration, head, tail));
        chains.push(self.audio_chain(segment, effective, head));

        let mut degraded = Vec::new();
        for transition in [&segment.transition_in, &segment.transition_out]
            .into_iter()
            .flatten()
        {
            if transition.kind.is_degraded() {
                degraded.push(transition.kind.as_str().to_string());
            }
        }

        Ok(RenderPlan {
            content_duration,
            head,
            tail,
            filter_complex: chains.join(";"),
            transition_in_applied: head > 0.0,
            transition_out_applied: tail > 0.0,
            degraded_effects: degraded,
        })
    }

    fn content_duration(
        &self,
        segment: &Segment,
        kind: AssetKind,
        durations: &ProbedDurations,
    ) -> f64 {
        if let (Some(voice), Some(voice_duration)) = (&segment.voice_over, durations.voice) {
            voice_duration + voice.start_delay + voice.end_delay
        } else if kind == AssetKind::Video {
            durations.visual.unwrap_or(self.default_image_duration)
        } else {
            self.default_image_duration
        }
    }

    /// Video chain: normalize, host transitions, truncate/extend, overlays.
    fn video_chain(
        &self,
        segment: &Segment,
        kind: AssetKind,
        durations: &ProbedDurations,
        content_duration: f64,
        head: f64,
        tail: f64,
    ) -> String {
        let effective = head + content_duration + tail;
        let mut steps: Vec<String> = Vec::new();

        if kind == AssetKind::Video {
            let source = durations.visual.unwrap_or(content_duration);
            if source > content_duration {
                steps.push(filters::trim_to(content_duration));
            }
            steps.push(filters::normalize_video(&self.format));

            if head > 0.0 {
                steps.push(filters::freeze_start(head));
            }
            // Freeze-extend covers both a short source and the tail padding.
            let shortfall = (content_duration - source).max(0.0);
            if shortfall + tail > 0.0 {
                steps.push(filters::freeze_stop(shortfall + tail));
            }
        } else {
            // Looped image input already produces frames for the whole
            // effective duration; only normalization is needed.
            steps.push(filters::normalize_video(&self.format));
        }

        if let Some(t) = fade_spec(&segment.transition_in) {
            steps.push(filters::video_fade(true, 0.0, t.duration, t.kind.fade_color()));
        }
        if let Some(t) = fade_spec(&segment.transition_out) {
            steps.push(filters::video_fade(
                false,
                effective - t.duration,
                t.duration,
                t.kind.fade_color(),
            ));
        }

        // Overlay windows are relative to content time; shift by the head
        // transition so they track the offset content.
        for overlay in &segment.text_over {
            steps.push(filters::drawtext(overlay, &self.text, head));
        }

        format!("[0:v]{}[vout]", steps.join(","))
    }

    /// Audio chain: offset, normalize, pad to the clip length, fades.
    fn audio_chain(&self, segment: &Segment, effective: f64, head: f64) -> String {
        let mut steps: Vec<String> = Vec::new();

        match &segment.voice_over {
            Some(voice) => {
                let offset = head + voice.start_delay;
                if offset > 0.0 {
                    steps.push(filters::audio_delay(offset));
                }
                steps.push(filters::normalize_audio(&self.format));
                steps.push(filters::audio_pad_to(effective));

                if let Some(t) = fade_spec(&segment.transition_in) {
                    steps.push(filters::audio_fade(true, 0.0, t.duration));
                }
                if let Some(t) = fade_spec(&segment.transition_out) {
                    steps.push(filters::audio_fade(false, effective - t.duration, t.duration));
                }
            }
            None => {
                // Silent track from anullsrc keeps every clip uniform for
                // stream-copy concatenation.
                steps.push(format!("atrim=duration={:.3}", effective));
                steps.push("asetpts=PTS-STARTPTS".to_string());
            }
        }

        format!("[1:a]{}[aout]", steps.join(","))
    }

    fn build_command(
        &self,
        plan: &RenderPlan,
        kind: AssetKind,
        visual: &Path,
        voice: Option<&Path>,
        output: &Path,
    ) -> FfmpegCommand {
        let effective = plan.effective_duration();

        let mut cmd = FfmpegCommand::new(output);
        cmd = match kind {
            AssetKind::Image => cmd.looped_image_input(visual, self.format.fps),
            _ => cmd.input(visual),
        };
        cmd = match voice {
            Some(path) => cmd.input(path),
            None => cmd.lavfi_input(format!(
                "anullsrc=r={}:cl={}",
                self.format.sample_rate,
                self.format.channel_layout()
            )),
        };

        cmd.filter_complex(plan.filter_complex.clone())
            .map("[vout]")
            .map("[aout]")
            .output_args(self.encoding.to_ffmpeg_args())
            .output_args(["-ar".to_string(), self.format.sample_rate.to_string()])
            .output_args(["-ac".to_string(), self.format.audio_channels.to_string()])
            .duration(effective)
    }

    fn resolve_visual(&self, segment: &Segment) -> MediaResult<(AssetKind, PathBuf)> {
        let (kind, asset) = segment
            .visual()
            .ok_or_else(|| MediaError::invalid_media(format!("segment {} has no visual", segment.id)))?;
        let path = asset.resolved().ok_or_else(|| {
            MediaError::invalid_media(format!(
                "segment {} visual '{}' has no resolved local path",
                segment.id, asset.url
            ))
        })?;
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        Ok((kind, path.to_path_buf()))
    }

    fn resolve_voice(&self, segment: &Segment) -> MediaResult<Option<PathBuf>> {
        match &segment.voice_over {
            None => Ok(None),
            Some(voice) => {
                let path = voice.audio.resolved().ok_or_else(|| {
                    MediaError::invalid_media(format!(
                        "segment {} voice-over '{}' has no resolved local path",
                        segment.id, voice.audio.url
                    ))
                })?;
                if !path.exists() {
                    return Err(MediaError::FileNotFound(path.to_path_buf()));
                }
                Ok(Some(path.to_path_buf()))
            }
        }
    }
}

/// Seconds a transition adds to the clip; cut adds nothing.
fn transition_padding(transition: &Option<Transition>) -> f64 {
    transition.as_ref().map(Transition::padding).unwrap_or(0.0)
}

/// The transition, when it renders as a fade with a positive duration.
fn fade_spec(transition: &Option<Transition>) -> Option<&Transition> {
    transition
        .as_ref()
        .filter(|t| !t.is_cut() && t.duration > 0.0)
}

/// Segment IDs become file name components; keep them filesystem-safe.
fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{AssetRef, TextOverlay, TransitionKind, VoiceOver};

    fn renderer() -> SegmentRenderer {
        SegmentRenderer::new(
            OutputFormat::default(),
            EncodingConfig::default(),
            TextDefaults::default(),
        )
        .with_default_image_duration(5.0)
    }

    fn image_segment(id: &str) -> Segment {
        Segment {
            id: id.to_string(),
            image: Some(AssetRef {
                url: "http://ex/a.jpg".into(),
                local_path: Some("/tmp/a.jpg".into()),
            }),
            video: None,
            voice_over: None,
            text_over: Vec::new(),
            transition_in: None,
            transition_out: None,
        }
    }

    fn with_voice(mut segment: Segment, start_delay: f64, end_delay: f64) -> Segment {
        segment.voice_over = Some(VoiceOver {
            audio: AssetRef {
                url: "http://ex/a.mp3".into(),
                local_path: Some("/tmp/a.mp3".into()),
            },
            content: None,
            start_delay,
            end_delay,
        });
        segment
    }

    #[test]
    fn test_image_only_uses_default_duration() {
        let plan = renderer()
            .plan(&image_segment("s1"), AssetKind::Image, &ProbedDurations::default())
            .unwrap();
        assert!((plan.content_duration - 5.0).abs() < 1e-9);
        assert!((plan.effective_duration() - 5.0).abs() < 1e-9);
        assert!(!plan.transition_in_applied);
    }

    #[test]
    fn test_voice_duration_with_delays() {
        let segment = with_voice(image_segment("s1"), 0.5, 1.0);
        let durations = ProbedDurations {
            visual: None,
            voice: Some(3.0),
        };
        let plan = renderer().plan(&segment, AssetKind::Image, &durations).unwrap();
        assert!((plan.content_duration - 4.5).abs() < 1e-9);
        assert!(plan.filter_complex.contains("adelay=500:all=1"));
        assert!(plan.filter_complex.contains("apad=whole_dur=4.500"));
    }

    #[test]
    fn test_additive_transitions_extend_duration() {
        let mut segment = with_voice(image_segment("s1"), 0.0, 0.0);
        segment.transition_in = Some(Transition::new(TransitionKind::Fade, 0.5));
        segment.transition_out = Some(Transition::new(TransitionKind::FadeWhite, 0.5));
        let durations = ProbedDurations {
            visual: None,
            voice: Some(2.0),
        };

        let plan = renderer().plan(&segment, AssetKind::Image, &durations).unwrap();
        assert!((plan.effective_duration() - 3.0).abs() < 1e-9);
        assert!(plan.transition_in_applied);
        assert!(plan.transition_out_applied);
        // Content is offset by the head transition.
        assert!(plan.filter_complex.contains("adelay=500:all=1"));
        // Tail fade lands at effective - tail with the declared color.
        assert!(plan
            .filter_complex
            .contains("fade=t=out:st=2.500:d=0.500:color=white"));
        assert!(plan.filter_complex.contains("fade=t=in:st=0.000:d=0.500:color=black"));
    }

    #[test]
    fn test_cut_transitions_add_nothing_and_apply_no_filter() {
        let mut segment = image_segment("s1");
        segment.transition_in = Some(Transition::new(TransitionKind::Cut, 0.5));
        segment.transition_out = Some(Transition::new(TransitionKind::Cut, 0.5));

        let plan = renderer()
            .plan(&segment, AssetKind::Image, &ProbedDurations::default())
            .unwrap();
        assert!((plan.effective_duration() - 5.0).abs() < 1e-9);
        assert!(!plan.transition_in_applied);
        assert!(!plan.transition_out_applied);
        assert!(!plan.filter_complex.contains("fade"));
    }

    #[test]
    fn test_short_video_freezes_last_frame() {
        let mut segment = image_segment("s1");
        segment.image = None;
        segment.video = Some(AssetRef {
            url: "http://ex/a.mp4".into(),
            local_path: Some("/tmp/a.mp4".into()),
        });
        let segment = with_voice(segment, 0.0, 0.0);
        let durations = ProbedDurations {
            visual: Some(2.0),
            voice: Some(4.0),
        };

        let plan = renderer().plan(&segment, AssetKind::Video, &durations).unwrap();
        // Source is 2s short of the 4s content.
        assert!(plan
            .filter_complex
            .contains("tpad=stop_mode=clone:stop_duration=2.000"));
        assert!(!plan.filter_complex.contains("trim=duration"));
    }

    #[test]
    fn test_long_video_truncated() {
        let mut segment = image_segment("s1");
        segment.image = None;
        segment.video = Some(AssetRef {
            url: "http://ex/a.mp4".into(),
            local_path: Some("/tmp/a.mp4".into()),
        });
        let segment = with_voice(segment, 0.0, 0.0);
        let durations = ProbedDurations {
            visual: Some(10.0),
            voice: Some(3.0),
        };

        let plan = renderer().plan(&segment, AssetKind::Video, &durations).unwrap();
        assert!(plan.filter_complex.contains("trim=duration=3.000"));
        assert!(!plan.filter_complex.contains("tpad="));
    }

    #[test]
    fn test_unknown_effect_degrades_with_warning() {
        let mut segment = image_segment("s1");
        segment.transition_in = Some(Transition::new(TransitionKind::Other("zoom".into()), 0.5));

        let plan = renderer()
            .plan(&segment, AssetKind::Image, &ProbedDurations::default())
            .unwrap();
        assert_eq!(plan.degraded_effects, vec!["zoom".to_string()]);
        // Degraded effect renders as a plain black fade.
        assert!(plan.filter_complex.contains("fade=t=in:st=0.000:d=0.500:color=black"));
        assert!((plan.effective_duration() - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_overlays_offset_by_head_transition() {
        let mut segment = image_segment("s1");
        segment.transition_in = Some(Transition::new(TransitionKind::Fade, 1.0));
        segment.text_over = vec![TextOverlay::new("Hi", 0.5, 2.0)];

        let plan = renderer()
            .plan(&segment, AssetKind::Image, &ProbedDurations::default())
            .unwrap();
        assert!(plan.filter_complex.contains("enable='between(t,1.500,3.000)'"));
    }

    #[test]
    fn test_silent_track_generated_without_voice() {
        let plan = renderer()
            .plan(&image_segment("s1"), AssetKind::Image, &ProbedDurations::default())
            .unwrap();
        assert!(plan.filter_complex.contains("[1:a]atrim=duration=5.000"));
    }

    #[test]
    fn test_safe_id() {
        assert_eq!(safe_id("seg-1_ok"), "seg-1_ok");
        assert_eq!(safe_id("a b/c"), "a_b_c");
    }
}
