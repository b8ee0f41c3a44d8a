//! Pipeline configuration.
//!
//! The single source of configuration: a typed record loaded once from the
//! environment, immutable afterwards. Every field has a default and an
//! env override named after its group (`DOWNLOAD_*`, `VIDEO_*`, `AUDIO_*`,
//! `TEXT_*`, `PERFORMANCE_*`, `AI_*`, `STORAGE_*`, `PIPELINE_*`).

use std::str::FromStr;
use std::time::Duration;

use vcomp_media::{BgmDefaults, TextDefaults};
use vcomp_models::{EncodingConfig, OutputFormat, ValidationLimits};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Asset download settings.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Maximum concurrent downloads
    pub max_concurrent: usize,
    /// Per-download timeout
    pub timeout: Duration,
    /// Per-file size cap in megabytes
    pub max_size_mb: u64,
    /// Reject downloads whose content type contradicts the asset kind
    pub check_content_type: bool,
    /// Retry attempts for transient download failures
    pub max_retries: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(60),
            max_size_mb: 200,
            check_content_type: true,
            max_retries: 3,
        }
    }
}

impl DownloadSettings {
    fn from_env() -> Self {
        Self {
            max_concurrent: env_parse("DOWNLOAD_MAX_CONCURRENT", 4),
            timeout: Duration::from_secs(env_parse("DOWNLOAD_TIMEOUT_SECS", 60)),
            max_size_mb: env_parse("DOWNLOAD_MAX_SIZE_MB", 200),
            check_content_type: env_bool("DOWNLOAD_CHECK_CONTENT_TYPE", true),
            max_retries: env_parse("DOWNLOAD_MAX_RETRIES", 3),
        }
    }
}

/// Output video settings.
#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pix_fmt: String,
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    pub audio_channels: u32,
    /// Duration for image-only segments without voice-over, seconds
    pub default_image_duration: f64,
    /// Floor for per-subprocess timeouts
    pub min_subprocess_timeout: Duration,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            pix_fmt: "yuv420p".to_string(),
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 18,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            sample_rate: 44100,
            audio_channels: 2,
            default_image_duration: 5.0,
            min_subprocess_timeout: Duration::from_secs(60),
        }
    }
}

impl VideoSettings {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            width: env_parse("VIDEO_WIDTH", d.width),
            height: env_parse("VIDEO_HEIGHT", d.height),
            fps: env_parse("VIDEO_FPS", d.fps),
            pix_fmt: env_string("VIDEO_PIX_FMT", &d.pix_fmt),
            codec: env_string("VIDEO_CODEC", &d.codec),
            preset: env_string("VIDEO_PRESET", &d.preset),
            crf: env_parse("VIDEO_CRF", d.crf),
            audio_codec: env_string("VIDEO_AUDIO_CODEC", &d.audio_codec),
            audio_bitrate: env_string("VIDEO_AUDIO_BITRATE", &d.audio_bitrate),
            sample_rate: env_parse("VIDEO_SAMPLE_RATE", d.sample_rate),
            audio_channels: env_parse("VIDEO_AUDIO_CHANNELS", d.audio_channels),
            default_image_duration: env_parse("VIDEO_DEFAULT_IMAGE_DURATION", 5.0),
            min_subprocess_timeout: Duration::from_secs(env_parse(
                "VIDEO_MIN_SUBPROCESS_TIMEOUT_SECS",
                60,
            )),
        }
    }
}

/// Background-music mix settings.
#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Default BGM volume when the job document leaves it unset
    pub bgm_volume: f64,
    /// Default BGM fade-in, seconds
    pub bgm_fade_in: f64,
    /// Default BGM fade-out, seconds
    pub bgm_fade_out: f64,
    /// Loop BGM shorter than the video instead of letting it run out
    pub bgm_loop: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            bgm_volume: 0.3,
            bgm_fade_in: 0.0,
            bgm_fade_out: 0.0,
            bgm_loop: false,
        }
    }
}

impl AudioSettings {
    fn from_env() -> Self {
        Self {
            bgm_volume: env_parse("AUDIO_BGM_VOLUME", 0.3),
            bgm_fade_in: env_parse("AUDIO_BGM_FADE_IN", 0.0),
            bgm_fade_out: env_parse("AUDIO_BGM_FADE_OUT", 0.0),
            bgm_loop: env_bool("AUDIO_BGM_LOOP", false),
        }
    }
}

/// Text overlay defaults.
#[derive(Debug, Clone)]
pub struct TextSettings {
    /// Path to the drawtext fontfile; None uses the system default
    pub font_file: Option<String>,
    pub font_size: u32,
    pub font_color: String,
    /// Overlay alpha fade envelope, seconds; 0 disables
    pub fade: f64,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            font_file: None,
            font_size: 48,
            font_color: "white".to_string(),
            fade: 0.0,
        }
    }
}

impl TextSettings {
    fn from_env() -> Self {
        Self {
            font_file: env_opt("TEXT_FONT_FILE"),
            font_size: env_parse("TEXT_FONT_SIZE", 48),
            font_color: env_string("TEXT_FONT_COLOR", "white"),
            fade: env_parse("TEXT_FADE", 0.0),
        }
    }
}

/// Concurrency and resource limits.
#[derive(Debug, Clone)]
pub struct PerformanceSettings {
    /// Maximum segments rendering in parallel
    pub max_concurrent_segments: usize,
    /// Approximate memory budget; caps render parallelism
    pub max_memory_mb: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_segments: 4,
            max_memory_mb: 2048,
        }
    }
}

impl PerformanceSettings {
    fn from_env() -> Self {
        Self {
            max_concurrent_segments: env_parse("PERFORMANCE_MAX_CONCURRENT_SEGMENTS", 4),
            max_memory_mb: env_parse("PERFORMANCE_MAX_MEMORY_MB", 2048),
        }
    }

    /// Render parallelism bounded by the memory budget. Each concurrent
    /// FFmpeg render is budgeted at roughly 512 MB.
    pub fn render_concurrency(&self) -> usize {
        let by_memory = (self.max_memory_mb / 512).max(1) as usize;
        self.max_concurrent_segments.clamp(1, by_memory.max(1))
    }
}

/// AI and remote-service settings.
#[derive(Debug, Clone)]
pub struct AiSettings {
    /// Enable LLM participation (span splitting, keyword extraction)
    pub enabled: bool,
    /// LLM structured-output endpoint
    pub endpoint: String,
    /// LLM model identifier
    pub model: String,
    /// LLM API key
    pub api_key: Option<String>,
    /// LLM request timeout
    pub timeout: Duration,
    /// Enable the transcript alignment stage
    pub align_enabled: bool,
    /// Forced-aligner endpoint
    pub aligner_endpoint: String,
    /// Forced-aligner request timeout
    pub aligner_timeout: Duration,
    /// Enable the image auto-fixer stage
    pub image_fix_enabled: bool,
    /// Image search endpoint; empty disables search (placeholder only)
    pub image_search_endpoint: Option<String>,
    /// Image search API key
    pub image_search_api_key: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8900/v1/structured".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            align_enabled: true,
            aligner_endpoint: "http://localhost:8765".to_string(),
            aligner_timeout: Duration::from_secs(120),
            image_fix_enabled: true,
            image_search_endpoint: None,
            image_search_api_key: None,
        }
    }
}

impl AiSettings {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_bool("AI_ENABLED", false),
            endpoint: env_string("AI_ENDPOINT", &d.endpoint),
            model: env_string("AI_MODEL", &d.model),
            api_key: env_opt("AI_API_KEY"),
            timeout: Duration::from_secs(env_parse("AI_TIMEOUT_SECS", 60)),
            align_enabled: env_bool("AI_ALIGN_ENABLED", true),
            aligner_endpoint: env_string("AI_ALIGNER_ENDPOINT", &d.aligner_endpoint),
            aligner_timeout: Duration::from_secs(env_parse("AI_ALIGNER_TIMEOUT_SECS", 120)),
            image_fix_enabled: env_bool("AI_IMAGE_FIX_ENABLED", true),
            image_search_endpoint: env_opt("AI_IMAGE_SEARCH_ENDPOINT"),
            image_search_api_key: env_opt("AI_IMAGE_SEARCH_API_KEY"),
        }
    }
}

/// Storage settings. Credentials stay in the storage crate's own config.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Enable the upload stage
    pub upload_enabled: bool,
    /// Key prefix for final artifacts
    pub key_prefix: String,
    /// Upload retry attempts
    pub max_retries: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_enabled: true,
            key_prefix: "renders".to_string(),
            max_retries: 3,
        }
    }
}

impl StorageSettings {
    fn from_env() -> Self {
        Self {
            upload_enabled: env_bool("STORAGE_UPLOAD_ENABLED", true),
            key_prefix: env_string("STORAGE_KEY_PREFIX", "renders"),
            max_retries: env_parse("STORAGE_MAX_RETRIES", 3),
        }
    }
}

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Root directory for per-job resource scopes
    pub work_dir: String,
    /// Fail the render batch on the first segment failure
    pub strict_mode: bool,
    /// Scope cleanup retry attempts
    pub cleanup_attempts: u32,
    /// Backoff between cleanup attempts
    pub cleanup_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            work_dir: "/tmp/vidcompose".to_string(),
            strict_mode: false,
            cleanup_attempts: 3,
            cleanup_backoff: Duration::from_millis(100),
        }
    }
}

impl EngineSettings {
    fn from_env() -> Self {
        Self {
            work_dir: env_string("PIPELINE_WORK_DIR", "/tmp/vidcompose"),
            strict_mode: env_bool("PIPELINE_STRICT_MODE", false),
            cleanup_attempts: env_parse("PIPELINE_CLEANUP_ATTEMPTS", 3),
            cleanup_backoff: Duration::from_millis(env_parse("PIPELINE_CLEANUP_BACKOFF_MS", 100)),
        }
    }
}

/// The complete, immutable pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub download: DownloadSettings,
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub text: TextSettings,
    pub performance: PerformanceSettings,
    pub ai: AiSettings,
    pub storage: StorageSettings,
    pub engine: EngineSettings,
}

impl Settings {
    /// Load settings from the environment. The only configuration source.
    pub fn from_env() -> Self {
        Self {
            download: DownloadSettings::from_env(),
            video: VideoSettings::from_env(),
            audio: AudioSettings::from_env(),
            text: TextSettings::from_env(),
            performance: PerformanceSettings::from_env(),
            ai: AiSettings::from_env(),
            storage: StorageSettings::from_env(),
            engine: EngineSettings::from_env(),
        }
    }

    /// The normalized format every intermediate clip targets.
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            width: self.video.width,
            height: self.video.height,
            fps: self.video.fps,
            pix_fmt: self.video.pix_fmt.clone(),
            sample_rate: self.video.sample_rate,
            audio_channels: self.video.audio_channels,
        }
    }

    /// Encoder parameters for renders and re-encode concatenation.
    pub fn encoding(&self) -> EncodingConfig {
        EncodingConfig {
            codec: self.video.codec.clone(),
            preset: self.video.preset.clone(),
            crf: self.video.crf,
            audio_codec: self.video.audio_codec.clone(),
            audio_bitrate: self.video.audio_bitrate.clone(),
            extra_args: Vec::new(),
        }
    }

    /// Overlay styling defaults.
    pub fn text_defaults(&self) -> TextDefaults {
        TextDefaults {
            font_file: self.text.font_file.clone(),
            size: self.text.font_size,
            color: self.text.font_color.clone(),
            fade: self.text.fade,
        }
    }

    /// BGM mix fallbacks.
    pub fn bgm_defaults(&self) -> BgmDefaults {
        BgmDefaults {
            volume: self.audio.bgm_volume,
            fade_in: self.audio.bgm_fade_in,
            fade_out: self.audio.bgm_fade_out,
        }
    }

    /// Bounds handed to semantic validation.
    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            default_image_duration: self.video.default_image_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.download.max_concurrent, 4);
        assert_eq!(settings.video.width, 1920);
        assert_eq!(settings.video.fps, 30);
        assert!(!settings.ai.enabled);
        assert!(settings.ai.align_enabled);
        assert!(!settings.engine.strict_mode);
    }

    #[test]
    fn test_output_format_derivation() {
        let settings = Settings::default();
        let format = settings.output_format();
        assert_eq!(format.canvas(), "1920x1080");
        assert_eq!(format.sample_rate, 44100);
    }

    #[test]
    fn test_render_concurrency_memory_cap() {
        let perf = PerformanceSettings {
            max_concurrent_segments: 8,
            max_memory_mb: 1024,
        };
        // 1024 MB / 512 MB per render = 2 concurrent renders.
        assert_eq!(perf.render_concurrency(), 2);

        let roomy = PerformanceSettings {
            max_concurrent_segments: 3,
            max_memory_mb: 8192,
        };
        assert_eq!(roomy.render_concurrency(), 3);
    }

    #[test]
    fn test_validation_limits_follow_video_settings() {
        let mut settings = Settings::default();
        settings.video.default_image_duration = 7.5;
        assert!((settings.validation_limits().default_image_duration - 7.5).abs() < 1e-9);
    }
}
