//! Shared data models for the VidCompose pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - The job document (segments, asset references, background music)
//! - Text overlays and transitions
//! - Structural and semantic validation
//! - Encoding configuration and the normalized output format
//! - Intermediate clip records
//! - Timestamp helpers for FFmpeg interop

pub mod clip;
pub mod encoding;
pub mod job;
pub mod overlay;
pub mod timestamp;
pub mod transition;
pub mod validation;

// Re-export common types
pub use clip::IntermediateClip;
pub use encoding::{EncodingConfig, OutputFormat};
pub use job::{AssetKind, AssetRef, BackgroundMusic, Job, JobId, Segment, VoiceOver};
pub use overlay::{OverlayBox, OverlayPosition, TextOverlay};
pub use timestamp::{format_timestamp, parse_timestamp};
pub use transition::{Transition, TransitionKind};
pub use validation::{validate_job, ValidationIssue, ValidationLimits, ValidationResult};
