//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Media file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels (0 for audio-only files)
    pub width: u32,
    /// Height in pixels (0 for audio-only files)
    pub height: u32,
    /// Frame rate (fps), 0.0 for audio-only files
    pub fps: f64,
    /// Video codec name, empty for audio-only files
    pub video_codec: String,
    /// Pixel format of the video stream
    pub pix_fmt: Option<String>,
    /// Audio codec name
    pub audio_codec: Option<String>,
    /// Audio sample rate
    pub sample_rate: Option<u32>,
    /// Audio channel count
    pub channels: Option<u32>,
    /// File size in bytes
    pub size: u64,
}

impl MediaInfo {
    /// True when the file carries a video stream.
    pub fn has_video(&self) -> bool {
        !self.video_codec.is_empty()
    }

    /// True when the file carries an audio stream.
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a media file for stream and format information.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    Ok(build_info(probe))
}

fn build_info(probe: FfprobeOutput) -> MediaInfo {
    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .and_then(|s| {
            s.avg_frame_rate
                .as_ref()
                .or(s.r_frame_rate.as_ref())
                .and_then(|r| parse_frame_rate(r))
        })
        .unwrap_or(0.0);

    MediaInfo {
        duration,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        fps,
        video_codec: video_stream
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_default(),
        pix_fmt: video_stream.and_then(|s| s.pix_fmt.clone()),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        sample_rate: audio_stream.and_then(|s| s.sample_rate.as_ref()?.parse().ok()),
        channels: audio_stream.and_then(|s| s.channels),
        size,
    }
}

/// Get media duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_media(path).await?;
    Ok(info.duration)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_build_info_video_with_audio() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{
                "format": { "duration": "3.000000", "size": "1024" },
                "streams": [
                    {
                        "codec_type": "video", "codec_name": "h264",
                        "width": 1920, "height": 1080, "pix_fmt": "yuv420p",
                        "avg_frame_rate": "30/1"
                    },
                    {
                        "codec_type": "audio", "codec_name": "aac",
                        "sample_rate": "44100", "channels": 2
                    }
                ]
            }"#,
        )
        .unwrap();

        let info = build_info(probe);
        assert!(info.has_video());
        assert!(info.has_audio());
        assert_eq!(info.width, 1920);
        assert_eq!(info.sample_rate, Some(44100));
        assert!((info.duration - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_info_audio_only() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{
                "format": { "duration": "2.500000" },
                "streams": [
                    { "codec_type": "audio", "codec_name": "mp3", "sample_rate": "48000", "channels": 1 }
                ]
            }"#,
        )
        .unwrap();

        let info = build_info(probe);
        assert!(!info.has_video());
        assert!(info.has_audio());
        assert_eq!(info.channels, Some(1));
    }
}
