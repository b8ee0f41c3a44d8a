//! FFmpeg filter construction.
//!
//! Every function here is pure: the rendered filter strings are fully
//! determined by their inputs, which keeps filter graphs reproducible and
//! testable without invoking FFmpeg.

use vcomp_models::{OutputFormat, TextOverlay};

/// Styling defaults applied to overlays that do not specify their own.
#[derive(Debug, Clone)]
pub struct TextDefaults {
    /// Path to the fontfile used by drawtext
    pub font_file: Option<String>,
    /// Font size in pixels
    pub size: u32,
    /// Font color
    pub color: String,
    /// Fade-in/fade-out envelope for overlay alpha, seconds; 0 disables
    pub fade: f64,
}

impl Default for TextDefaults {
    fn default() -> Self {
        Self {
            font_file: None,
            size: 48,
            color: "white".to_string(),
            fade: 0.0,
        }
    }
}

/// Scale preserving aspect and pad to the target canvas, centered.
pub fn scale_pad(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
        w = width,
        h = height
    )
}

/// Full video normalization chain: canvas, constant frame rate, pixel format.
pub fn normalize_video(format: &OutputFormat) -> String {
    format!(
        "{},fps={},format={}",
        scale_pad(format.width, format.height),
        format.fps,
        format.pix_fmt
    )
}

/// Audio normalization chain: sample rate and channel layout.
pub fn normalize_audio(format: &OutputFormat) -> String {
    format!(
        "aresample={},aformat=sample_fmts=fltp:channel_layouts={}",
        format.sample_rate,
        format.channel_layout()
    )
}

/// Video fade filter at a given point of the clip timeline.
pub fn video_fade(fade_in: bool, start: f64, duration: f64, color: &str) -> String {
    format!(
        "fade=t={}:st={:.3}:d={:.3}:color={}",
        if fade_in { "in" } else { "out" },
        start,
        duration,
        color
    )
}

/// Audio fade filter at a given point of the clip timeline.
pub fn audio_fade(fade_in: bool, start: f64, duration: f64) -> String {
    format!(
        "afade=t={}:st={:.3}:d={:.3}",
        if fade_in { "in" } else { "out" },
        start,
        duration
    )
}

/// Delay all audio channels by the given number of seconds.
pub fn audio_delay(seconds: f64) -> String {
    format!("adelay={}:all=1", (seconds * 1000.0).round() as i64)
}

/// Pad audio with silence up to a whole-clip duration.
pub fn audio_pad_to(duration: f64) -> String {
    format!("apad=whole_dur={:.3}", duration)
}

/// Hold the first frame for `seconds` (used to host a head transition).
pub fn freeze_start(seconds: f64) -> String {
    format!("tpad=start_mode=clone:start_duration={:.3}", seconds)
}

/// Hold the last frame for `seconds` (freeze-extend short video sources).
pub fn freeze_stop(seconds: f64) -> String {
    format!("tpad=stop_mode=clone:stop_duration={:.3}", seconds)
}

/// Truncate a stream to `seconds` and reset timestamps.
pub fn trim_to(seconds: f64) -> String {
    format!("trim=duration={:.3},setpts=PTS-STARTPTS", seconds)
}

/// drawtext filter for one overlay, scoped to its `[start, end]` window.
pub fn drawtext(overlay: &TextOverlay, defaults: &TextDefaults, window_offset: f64) -> String {
    let start = overlay.start + window_offset;
    let end = overlay.end + window_offset;

    let size = overlay.size.unwrap_or(defaults.size);
    let color = overlay.color.as_deref().unwrap_or(&defaults.color);

    let mut filter = format!(
        "drawtext=text='{}':fontsize={}:fontcolor={}",
        escape_drawtext_text(&overlay.text),
        size,
        color
    );

    let font = overlay.font.as_deref().or(defaults.font_file.as_deref());
    if let Some(font_file) = font {
        filter.push_str(&format!(":fontfile='{}'", font_file));
    }

    filter.push_str(":x=(w-text_w)/2");
    filter.push_str(&format!(":y={}", overlay.position.y_expr()));

    if let Some(box_style) = &overlay.box_style {
        filter.push_str(&format!(
            ":box=1:boxcolor={}@{:.2}:boxborderw={}",
            box_style.color, box_style.opacity, box_style.border
        ));
    }

    // Fade envelope only when the window can host both ramps.
    let fade = defaults.fade;
    if fade > 0.0 && (end - start) > 2.0 * fade {
        filter.push_str(&format!(
            ":alpha='if(lt(t,{s:.3}+{f:.3}),(t-{s:.3})/{f:.3},\
             if(gt(t,{e:.3}-{f:.3}),({e:.3}-t)/{f:.3},1))'",
            s = start,
            e = end,
            f = fade
        ));
    }

    filter.push_str(&format!(":enable='between(t,{:.3},{:.3})'", start, end));
    filter
}

/// Escape text for use inside a drawtext `text='...'` value.
pub fn escape_drawtext_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("'\\''"),
            ':' => escaped.push_str("\\:"),
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// concat filter joining `n` normalized video+audio inputs.
pub fn concat_filter(n: usize) -> String {
    let mut filter = String::new();
    for i in 0..n {
        filter.push_str(&format!("[{i}:v][{i}:a]"));
    }
    filter.push_str(&format!("concat=n={}:v=1:a=1[vout][aout]", n));
    filter
}

/// Background music mix over a finished video track.
///
/// Input 0 is the concatenated video, input 1 the music. The music is
/// volume-scaled, faded, and the mix is clipped to the video duration.
pub fn bgm_mix_filter(
    volume: f64,
    fade_in: f64,
    fade_out: f64,
    video_duration: f64,
    bgm_duration: f64,
    format: &OutputFormat,
) -> String {
    let mut bgm_chain = format!("[1:a]volume={:.3}", volume);

    if fade_in > 0.0 {
        bgm_chain.push(',');
        bgm_chain.push_str(&audio_fade(true, 0.0, fade_in));
    }
    if fade_out > 0.0 {
        // Fade at the end of whichever runs out first.
        let fade_at = (video_duration.min(bgm_duration) - fade_out).max(0.0);
        bgm_chain.push(',');
        bgm_chain.push_str(&audio_fade(false, fade_at, fade_out));
    }
    bgm_chain.push_str("[bgm]");

    format!(
        "{};[0:a][bgm]amix=inputs=2:duration=first:dropout_transition=0:normalize=0,\
         aresample={}[aout]",
        bgm_chain, format.sample_rate
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::OverlayBox;

    fn format() -> OutputFormat {
        OutputFormat::default()
    }

    #[test]
    fn test_scale_pad_centered() {
        let filter = scale_pad(1920, 1080);
        assert!(filter.contains("scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1920:1080:(ow-iw)/2:(oh-ih)/2"));
        assert!(filter.ends_with("setsar=1"));
    }

    #[test]
    fn test_normalize_video_chain() {
        let filter = normalize_video(&format());
        assert!(filter.contains("fps=30"));
        assert!(filter.contains("format=yuv420p"));
    }

    #[test]
    fn test_fades() {
        assert_eq!(
            video_fade(true, 0.0, 0.5, "black"),
            "fade=t=in:st=0.000:d=0.500:color=black"
        );
        assert_eq!(
            video_fade(false, 4.5, 0.5, "white"),
            "fade=t=out:st=4.500:d=0.500:color=white"
        );
        assert_eq!(audio_fade(true, 0.0, 1.0), "afade=t=in:st=0.000:d=1.000");
    }

    #[test]
    fn test_audio_timing_filters() {
        assert_eq!(audio_delay(1.5), "adelay=1500:all=1");
        assert_eq!(audio_pad_to(5.0), "apad=whole_dur=5.000");
    }

    #[test]
    fn test_freeze_filters() {
        assert_eq!(
            freeze_start(0.5),
            "tpad=start_mode=clone:start_duration=0.500"
        );
        assert_eq!(freeze_stop(1.25), "tpad=stop_mode=clone:stop_duration=1.250");
        assert_eq!(trim_to(3.0), "trim=duration=3.000,setpts=PTS-STARTPTS");
    }

    #[test]
    fn test_drawtext_window_and_defaults() {
        let overlay = TextOverlay::new("Hello world", 1.0, 3.0);
        let filter = drawtext(&overlay, &TextDefaults::default(), 0.5);

        assert!(filter.contains("text='Hello world'"));
        assert!(filter.contains("fontsize=48"));
        assert!(filter.contains("fontcolor=white"));
        assert!(filter.contains("enable='between(t,1.500,3.500)'"));
        assert!(!filter.contains("alpha="));
    }

    #[test]
    fn test_drawtext_box_and_fade() {
        let mut overlay = TextOverlay::new("Hi", 0.0, 4.0);
        overlay.box_style = Some(OverlayBox::default());
        let defaults = TextDefaults {
            fade: 0.3,
            ..TextDefaults::default()
        };
        let filter = drawtext(&overlay, &defaults, 0.0);

        assert!(filter.contains("box=1:boxcolor=black@0.50:boxborderw=10"));
        assert!(filter.contains("alpha='if(lt(t,"));
    }

    #[test]
    fn test_drawtext_escaping() {
        assert_eq!(escape_drawtext_text("50% off: don't"), "50\\% off\\: don'\\''t");
        assert_eq!(escape_drawtext_text("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_concat_filter() {
        let filter = concat_filter(3);
        assert!(filter.starts_with("[0:v][0:a][1:v][1:a][2:v][2:a]"));
        assert!(filter.ends_with("concat=n=3:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn test_bgm_mix_fade_out_at_shorter_track() {
        // BGM shorter than video: fade must land at the end of the music.
        let filter = bgm_mix_filter(0.5, 1.0, 2.0, 60.0, 30.0, &format());
        assert!(filter.contains("volume=0.500"));
        assert!(filter.contains("afade=t=in:st=0.000:d=1.000"));
        assert!(filter.contains("afade=t=out:st=28.000:d=2.000"));
        assert!(filter.contains("amix=inputs=2:duration=first"));
    }

    #[test]
    fn test_bgm_mix_no_fades() {
        let filter = bgm_mix_filter(1.0, 0.0, 0.0, 10.0, 20.0, &format());
        assert!(!filter.contains("afade"));
        assert!(filter.contains("duration=first"));
    }
}
