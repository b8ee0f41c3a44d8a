//! Job document definitions.
//!
//! A `Job` is the validated input describing one composition task: an
//! ordered list of segments, an optional background-music track and
//! informational metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::overlay::TextOverlay;
use crate::transition::Transition;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a media asset, remote or local.
///
/// The downloader resolves `url` into `local_path`; once set, `local_path`
/// is the source of truth for every later stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssetRef {
    /// http(s) URL or a local filesystem path
    pub url: String,

    /// Resolved local file, populated by the downloader
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl AssetRef {
    /// Create a reference from a URL string.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_path: None,
        }
    }

    /// True when the URL points at a remote http(s) resource.
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    /// The resolved local file, if the downloader has run.
    pub fn resolved(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }
}

/// Kind of asset a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
    Audio,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voice-over audio bound to a segment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VoiceOver {
    /// Audio asset
    #[serde(flatten)]
    pub audio: AssetRef,

    /// Transcript text, enables timed text overlay generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Silence before the voice starts, seconds
    #[serde(default)]
    pub start_delay: f64,

    /// Silence after the voice ends, seconds
    #[serde(default)]
    pub end_delay: f64,
}

/// Background music mixed under the whole composition.
///
/// Unset volume and fades resolve to the configured audio defaults at the
/// concatenation stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BackgroundMusic {
    /// Audio asset
    #[serde(flatten)]
    pub audio: AssetRef,

    /// Volume multiplier, 0.0 to 2.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,

    /// Fade-in at the head of the mix, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,

    /// Fade-out at the tail of the mix, seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
}

/// One ordered slice of the output video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Unique segment ID within the job
    pub id: String,

    /// Still-image visual
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<AssetRef>,

    /// Video visual; wins over `image` when both are present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<AssetRef>,

    /// Voice-over audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_over: Option<VoiceOver>,

    /// Timed text overlays
    #[serde(default)]
    pub text_over: Vec<TextOverlay>,

    /// Transition at the head of the segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_in: Option<Transition>,

    /// Transition at the tail of the segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_out: Option<Transition>,
}

impl Segment {
    /// The visual asset that will be rendered. Video wins over image.
    pub fn visual(&self) -> Option<(AssetKind, &AssetRef)> {
        if let Some(video) = &self.video {
            Some((AssetKind::Video, video))
        } else {
            self.image.as_ref().map(|img| (AssetKind::Image, img))
        }
    }

    /// Sum of head and tail transition durations, seconds.
    ///
    /// `cut` transitions contribute zero regardless of a declared duration.
    pub fn transition_padding(&self) -> (f64, f64) {
        let head = self
            .transition_in
            .as_ref()
            .map(Transition::padding)
            .unwrap_or(0.0);
        let tail = self
            .transition_out
            .as_ref()
            .map(Transition::padding)
            .unwrap_or(0.0);
        (head, tail)
    }
}

/// The input document for one composition task.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Ordered, non-empty list of segments
    pub segments: Vec<Segment>,

    /// Background music mixed under the final video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<BackgroundMusic>,

    /// Content niche, informs image search keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub niche: Option<String>,

    /// Free-form keywords, inform image search
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Informational title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Informational description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Job {
    /// Parse a job document from JSON.
    pub fn from_json(doc: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc.clone())
    }

    /// Visit every asset reference in the document, mutably.
    ///
    /// Order is deterministic: per segment visual-then-voice, then the
    /// background music. The downloader relies on this to assign resolved
    /// paths in one pass.
    pub fn visit_assets_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(AssetKind, Option<&str>, &mut AssetRef),
    {
        for segment in &mut self.segments {
            let id = segment.id.clone();
            if let Some(video) = &mut segment.video {
                visit(AssetKind::Video, Some(&id), video);
            }
            if let Some(image) = &mut segment.image {
                visit(AssetKind::Image, Some(&id), image);
            }
            if let Some(voice) = &mut segment.voice_over {
                visit(AssetKind::Audio, Some(&id), &mut voice.audio);
            }
        }
        if let Some(bgm) = &mut self.background_music {
            visit(AssetKind::Audio, None, &mut bgm.audio);
        }
    }

    /// Segment lookup by ID.
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> serde_json::Value {
        serde_json::json!({
            "segments": [
                {
                    "id": "only",
                    "image": { "url": "http://ex/a.jpg" },
                    "voice_over": { "url": "http://ex/a.mp3" }
                }
            ]
        })
    }

    #[test]
    fn test_parse_minimal_job() {
        let job = Job::from_json(&minimal_doc()).unwrap();
        assert_eq!(job.segments.len(), 1);
        assert_eq!(job.segments[0].id, "only");
        assert!(job.background_music.is_none());

        let (kind, asset) = job.segments[0].visual().unwrap();
        assert_eq!(kind, AssetKind::Image);
        assert_eq!(asset.url, "http://ex/a.jpg");
    }

    #[test]
    fn test_video_wins_over_image() {
        let doc = serde_json::json!({
            "segments": [{
                "id": "s1",
                "image": { "url": "http://ex/a.jpg" },
                "video": { "url": "http://ex/a.mp4" }
            }]
        });
        let job = Job::from_json(&doc).unwrap();
        let (kind, asset) = job.segments[0].visual().unwrap();
        assert_eq!(kind, AssetKind::Video);
        assert_eq!(asset.url, "http://ex/a.mp4");
    }

    #[test]
    fn test_visit_assets_order() {
        let doc = serde_json::json!({
            "segments": [{
                "id": "s1",
                "image": { "url": "http://ex/a.jpg" },
                "voice_over": { "url": "http://ex/a.mp3" }
            }],
            "background_music": { "url": "http://ex/bgm.mp3", "volume": 0.5 }
        });
        let mut job = Job::from_json(&doc).unwrap();

        let mut seen = Vec::new();
        job.visit_assets_mut(|kind, segment_id, asset| {
            seen.push((kind, segment_id.map(str::to_string), asset.url.clone()));
        });

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, AssetKind::Image);
        assert_eq!(seen[1].0, AssetKind::Audio);
        assert_eq!(seen[2], (AssetKind::Audio, None, "http://ex/bgm.mp3".into()));
    }

    #[test]
    fn test_asset_ref_remote_detection() {
        assert!(AssetRef::new("https://ex/a.jpg").is_remote());
        assert!(AssetRef::new("http://ex/a.jpg").is_remote());
        assert!(!AssetRef::new("/data/a.jpg").is_remote());
    }

    #[test]
    fn test_bgm_fields_optional() {
        let doc = serde_json::json!({
            "segments": [{ "id": "s", "image": { "url": "x.jpg" } }],
            "background_music": { "url": "b.mp3" }
        });
        let job = Job::from_json(&doc).unwrap();
        let bgm = job.background_music.unwrap();
        assert!(bgm.volume.is_none());
        assert!(bgm.fade_in.is_none());

        let doc = serde_json::json!({
            "segments": [{ "id": "s", "image": { "url": "x.jpg" } }],
            "background_music": { "url": "b.mp3", "volume": 0.5, "fade_out": 2.0 }
        });
        let job = Job::from_json(&doc).unwrap();
        let bgm = job.background_music.unwrap();
        assert_eq!(bgm.volume, Some(0.5));
        assert_eq!(bgm.fade_out, Some(2.0));
    }
}
