//! Concatenation of intermediate clips and background-music mixing.
//!
//! Because transitions are applied additively on each clip's own timeline,
//! edges never overlap and concatenation is a pure append. The only
//! decision is whether the append can stream-copy or must re-encode.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vcomp_models::{BackgroundMusic, EncodingConfig, IntermediateClip, OutputFormat};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::probe;

/// How the clips will be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// Concat demuxer with `-c copy`; no re-encode
    StreamCopy,
    /// concat filter with an explicit re-encode
    Reencode,
}

impl ConcatStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatStrategy::StreamCopy => "stream_copy",
            ConcatStrategy::Reencode => "reencode",
        }
    }
}

/// Select the join strategy for an ordered clip list.
///
/// Every intermediate shares the normalized output format by construction,
/// so the strategy only depends on the edges: any baked-in transition
/// forces the re-encode path, all-cut (or absent) edges stream-copy.
pub fn select_strategy(clips: &[IntermediateClip]) -> ConcatStrategy {
    if clips.iter().all(IntermediateClip::has_clean_edges) {
        ConcatStrategy::StreamCopy
    } else {
        ConcatStrategy::Reencode
    }
}

/// Fallback BGM mix parameters for fields the job document leaves unset.
#[derive(Debug, Clone)]
pub struct BgmDefaults {
    pub volume: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Default for BgmDefaults {
    fn default() -> Self {
        Self {
            volume: 0.3,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }
}

/// Joins intermediate clips and mixes background music.
#[derive(Debug, Clone)]
pub struct Concatenator {
    format: OutputFormat,
    encoding: EncodingConfig,
    bgm_defaults: BgmDefaults,
    bgm_loop: bool,
    min_subprocess_timeout: Duration,
}

impl Concatenator {
    pub fn new(format: OutputFormat, encoding: EncodingConfig) -> Self {
        Self {
            format,
            encoding,
            bgm_defaults: BgmDefaults::default(),
            bgm_loop: false,
            min_subprocess_timeout: Duration::from_secs(120),
        }
    }

    /// Mix parameters used when the job document leaves them unset.
    pub fn with_bgm_defaults(mut self, defaults: BgmDefaults) -> Self {
        self.bgm_defaults = defaults;
        self
    }

    /// Loop background music that is shorter than the video.
    pub fn with_bgm_loop(mut self, enabled: bool) -> Self {
        self.bgm_loop = enabled;
        self
    }

    /// Floor for the per-subprocess timeout.
    pub fn with_min_subprocess_timeout(mut self, timeout: Duration) -> Self {
        self.min_subprocess_timeout = timeout;
        self
    }

    /// Join clips in index order and mix background music, producing the
    /// final MP4 at `scope_dir/final_<job_id>.mp4`.
    pub async fn concatenate(
        &self,
        clips: &[IntermediateClip],
        bgm: Option<&BackgroundMusic>,
        scope_dir: &Path,
        job_id: &str,
        cancel: CancellationToken,
    ) -> MediaResult<(PathBuf, ConcatStrategy)> {
        if clips.is_empty() {
            return Err(MediaError::invalid_media("no clips to concatenate"));
        }

        let strategy = select_strategy(clips);
        let total_duration: f64 = clips.iter().map(|c| c.duration_s).sum();
        let final_path = scope_dir.join(format!("final_{}.mp4", job_id));

        info!(
            clips = clips.len(),
            strategy = strategy.as_str(),
            duration = total_duration,
            "Concatenating clips"
        );
        metrics::counter!("concat_total", "strategy" => strategy.as_str()).increment(1);

        let joined = if bgm.is_some() {
            scope_dir.join(format!("joined_{}.mp4", job_id))
        } else {
            final_path.clone()
        };

        let timeout = Duration::from_secs_f64(
            (total_duration * 10.0).max(self.min_subprocess_timeout.as_secs_f64()),
        );
        let runner = FfmpegRunner::new().with_cancel(cancel.clone()).with_timeout(timeout);

        match strategy {
            ConcatStrategy::StreamCopy => {
                let list_path = scope_dir.join(format!("concat_{}.txt", job_id));
                tokio::fs::write(&list_path, concat_list(clips)).await?;
                let cmd = FfmpegCommand::new(&joined)
                    .input_with_args(&list_path, ["-f", "concat", "-safe", "0"])
                    .stream_copy();
                runner.run(&cmd).await?;
            }
            ConcatStrategy::Reencode => {
                let mut cmd = FfmpegCommand::new(&joined);
                for clip in clips {
                    cmd = cmd.input(&clip.path);
                }
                let cmd = cmd
                    .filter_complex(filters::concat_filter(clips.len()))
                    .map("[vout]")
                    .map("[aout]")
                    .output_args(self.encoding.to_ffmpeg_args());
                runner.run(&cmd).await?;
            }
        }

        if let Some(bgm) = bgm {
            self.mix_bgm(&joined, bgm, &final_path, total_duration, cancel)
                .await?;
            tokio::fs::remove_file(&joined).await.ok();
        }

        Ok((final_path, strategy))
    }

    /// Overlay background music on the joined video.
    ///
    /// The video stream is copied untouched; only the audio is re-encoded.
    async fn mix_bgm(
        &self,
        video: &Path,
        bgm: &BackgroundMusic,
        output: &Path,
        video_duration: f64,
        cancel: CancellationToken,
    ) -> MediaResult<()> {
        let bgm_path = bgm.audio.resolved().ok_or_else(|| {
            MediaError::invalid_media(format!(
                "background music '{}' has no resolved local path",
                bgm.audio.url
            ))
        })?;

        let bgm_duration = probe::get_duration(bgm_path).await?;
        let looped = self.bgm_loop && bgm_duration < video_duration;
        // A looped track effectively covers the whole video.
        let effective_bgm = if looped { video_duration } else { bgm_duration };

        let filter = filters::bgm_mix_filter(
            bgm.volume.unwrap_or(self.bgm_defaults.volume),
            bgm.fade_in.unwrap_or(self.bgm_defaults.fade_in),
            bgm.fade_out.unwrap_or(self.bgm_defaults.fade_out),
            video_duration,
            effective_bgm,
            &self.format,
        );

        debug!(
            bgm = %bgm_path.display(),
            looped = looped,
            filter = %filter,
            "Mixing background music"
        );

        let mut cmd = FfmpegCommand::new(output).input(video);
        cmd = if looped {
            cmd.input_with_args(bgm_path, ["-stream_loop", "-1"])
        } else {
            cmd.input(bgm_path)
        };
        let cmd = cmd
            .filter_complex(filter)
            .map("0:v")
            .map("[aout]")
            .output_args(["-c:v", "copy"])
            .output_args([
                "-c:a".to_string(),
                self.encoding.audio_codec.clone(),
                "-b:a".to_string(),
                self.encoding.audio_bitrate.clone(),
            ])
            .duration(video_duration);

        let timeout = Duration::from_secs_f64(
            (video_duration * 10.0).max(self.min_subprocess_timeout.as_secs_f64()),
        );
        FfmpegRunner::new()
            .with_cancel(cancel)
            .with_timeout(timeout)
            .run(&cmd)
            .await
    }
}

/// Concat demuxer list file contents.
fn concat_list(clips: &[IntermediateClip]) -> String {
    let mut list = String::new();
    for clip in clips {
        // Single quotes in paths must be closed, escaped and reopened.
        let path = clip.path.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", path));
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(index: usize, fade_in: bool, fade_out: bool) -> IntermediateClip {
        IntermediateClip {
            index,
            segment_id: format!("s{}", index),
            path: PathBuf::from(format!("/tmp/seg_{:03}.mp4", index)),
            duration_s: 2.0,
            has_audio: true,
            transition_in_applied: fade_in,
            transition_out_applied: fade_out,
        }
    }

    #[test]
    fn test_all_cut_selects_stream_copy() {
        let clips = vec![clip(0, false, false), clip(1, false, false), clip(2, false, false)];
        assert_eq!(select_strategy(&clips), ConcatStrategy::StreamCopy);
    }

    #[test]
    fn test_any_fade_forces_reencode() {
        let clips = vec![clip(0, false, true), clip(1, true, false)];
        assert_eq!(select_strategy(&clips), ConcatStrategy::Reencode);
    }

    #[test]
    fn test_single_clean_clip_stream_copies() {
        let clips = vec![clip(0, false, false)];
        assert_eq!(select_strategy(&clips), ConcatStrategy::StreamCopy);
    }

    #[test]
    fn test_concat_list_format() {
        let clips = vec![clip(0, false, false), clip(1, false, false)];
        let list = concat_list(&clips);
        assert_eq!(list, "file '/tmp/seg_000.mp4'\nfile '/tmp/seg_001.mp4'\n");
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let mut c = clip(0, false, false);
        c.path = PathBuf::from("/tmp/it's.mp4");
        let list = concat_list(&[c]);
        assert!(list.contains("file '/tmp/it'\\''s.mp4'"));
    }
}
