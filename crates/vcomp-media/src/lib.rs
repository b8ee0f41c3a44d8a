//! FFmpeg CLI wrapper for the VidCompose pipeline.
//!
//! This crate provides:
//! - FFmpeg command builder and runner with timeout/cancellation
//! - FFprobe media inspection
//! - Pure filter-graph construction
//! - The per-segment renderer producing normalized intermediate clips
//! - The concatenator with stream-copy and re-encode paths

pub mod command;
pub mod concat;
pub mod error;
pub mod filters;
pub mod placeholder;
pub mod probe;
pub mod progress;
pub mod renderer;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{select_strategy, BgmDefaults, ConcatStrategy, Concatenator};
pub use error::{MediaError, MediaResult};
pub use filters::TextDefaults;
pub use placeholder::generate_placeholder;
pub use probe::{get_duration, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use renderer::{ProbedDurations, RenderPlan, SegmentRenderer};
