//! Intermediate clip records produced by the segment renderer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One normalized per-segment MP4, ready for concatenation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IntermediateClip {
    /// Position of the source segment within the job
    pub index: usize,

    /// Source segment ID
    pub segment_id: String,

    /// Rendered MP4 inside the job's resource scope
    pub path: PathBuf,

    /// Total clip duration including additive transitions, seconds
    pub duration_s: f64,

    /// True when the segment carried voice-over audio
    pub has_audio: bool,

    /// A non-cut head transition was baked into the clip
    pub transition_in_applied: bool,

    /// A non-cut tail transition was baked into the clip
    pub transition_out_applied: bool,
}

impl IntermediateClip {
    /// True when both edges of this clip are clean cut boundaries.
    pub fn has_clean_edges(&self) -> bool {
        !self.transition_in_applied && !self.transition_out_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_edges() {
        let clip = IntermediateClip {
            index: 0,
            segment_id: "s1".into(),
            path: PathBuf::from("/tmp/seg_000_s1.mp4"),
            duration_s: 3.0,
            has_audio: true,
            transition_in_applied: false,
            transition_out_applied: false,
        };
        assert!(clip.has_clean_edges());

        let faded = IntermediateClip {
            transition_out_applied: true,
            ..clip
        };
        assert!(!faded.has_clean_edges());
    }
}
