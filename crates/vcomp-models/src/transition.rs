//! Segment transition types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported transition effects.
///
/// Unknown effect names deserialize into `Other` and degrade to `Fade` at
/// render time; the job document is never rejected for an effect name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(from = "String", into = "String")]
pub enum TransitionKind {
    /// Fade from/to black (plain `fade` filter)
    Fade,
    /// Fade through black
    FadeBlack,
    /// Fade through white
    FadeWhite,
    /// Hard cut, no filter; keeps the edge stream-copyable
    Cut,
    /// Unrecognized effect name, degrades to `Fade`
    Other(String),
}

impl From<String> for TransitionKind {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "fade" => TransitionKind::Fade,
            "fadeblack" => TransitionKind::FadeBlack,
            "fadewhite" => TransitionKind::FadeWhite,
            "cut" => TransitionKind::Cut,
            _ => TransitionKind::Other(s),
        }
    }
}

impl From<TransitionKind> for String {
    fn from(kind: TransitionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TransitionKind {
    /// The kind actually rendered. `Other` degrades to `Fade`.
    pub fn effective(&self) -> TransitionKind {
        match self {
            TransitionKind::Other(_) => TransitionKind::Fade,
            other => other.clone(),
        }
    }

    /// True when this kind was degraded from an unsupported name.
    pub fn is_degraded(&self) -> bool {
        matches!(self, TransitionKind::Other(_))
    }

    /// Fade color for the ffmpeg `fade`/`afade` filters.
    pub fn fade_color(&self) -> &'static str {
        match self.effective() {
            TransitionKind::FadeWhite => "white",
            _ => "black",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::FadeBlack => "fadeblack",
            TransitionKind::FadeWhite => "fadewhite",
            TransitionKind::Cut => "cut",
            TransitionKind::Other(name) => name,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition at the head or tail of a segment.
///
/// Transitions are additive: the duration extends the hosting segment and
/// never overlaps a neighbor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    /// Effect name
    #[serde(rename = "type")]
    pub kind: TransitionKind,

    /// Effect duration, seconds, >= 0
    #[serde(default)]
    pub duration: f64,
}

impl Transition {
    pub fn new(kind: TransitionKind, duration: f64) -> Self {
        Self { kind, duration }
    }

    /// True when the rendered effect is a hard cut.
    pub fn is_cut(&self) -> bool {
        self.kind.effective() == TransitionKind::Cut
    }

    /// Seconds this transition adds to the segment timeline.
    ///
    /// A cut is a clean boundary and adds nothing.
    pub fn padding(&self) -> f64 {
        if self.is_cut() {
            0.0
        } else {
            self.duration.max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kinds_roundtrip() {
        for (json, kind) in [
            ("\"fade\"", TransitionKind::Fade),
            ("\"fadeblack\"", TransitionKind::FadeBlack),
            ("\"fadewhite\"", TransitionKind::FadeWhite),
            ("\"cut\"", TransitionKind::Cut),
        ] {
            let parsed: TransitionKind = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_degrades_to_fade() {
        let parsed: TransitionKind = serde_json::from_str("\"dissolve\"").unwrap();
        assert_eq!(parsed, TransitionKind::Other("dissolve".to_string()));
        assert_eq!(parsed.effective(), TransitionKind::Fade);
        assert!(parsed.is_degraded());
    }

    #[test]
    fn test_fade_colors() {
        assert_eq!(TransitionKind::Fade.fade_color(), "black");
        assert_eq!(TransitionKind::FadeBlack.fade_color(), "black");
        assert_eq!(TransitionKind::FadeWhite.fade_color(), "white");
        assert_eq!(TransitionKind::Other("zoom".into()).fade_color(), "black");
    }

    #[test]
    fn test_cut_adds_no_padding() {
        let cut = Transition::new(TransitionKind::Cut, 0.5);
        assert_eq!(cut.padding(), 0.0);

        let fade = Transition::new(TransitionKind::Fade, 0.5);
        assert!((fade.padding() - 0.5).abs() < f64::EPSILON);
    }
}
