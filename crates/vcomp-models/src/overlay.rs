//! Timed text overlay types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Vertical placement of an overlay on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

impl OverlayPosition {
    /// drawtext y expression for this placement.
    pub fn y_expr(&self) -> &'static str {
        match self {
            OverlayPosition::Top => "h*0.08",
            OverlayPosition::Center => "(h-text_h)/2",
            OverlayPosition::Bottom => "h-text_h-h*0.08",
        }
    }
}

/// Background box behind overlay text.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OverlayBox {
    /// Box color
    #[serde(default = "default_box_color")]
    pub color: String,

    /// Box opacity, 0.0 to 1.0
    #[serde(default = "default_box_opacity")]
    pub opacity: f64,

    /// Border width in pixels around the text
    #[serde(default = "default_box_border")]
    pub border: u32,
}

fn default_box_color() -> String {
    "black".to_string()
}
fn default_box_opacity() -> f64 {
    0.5
}
fn default_box_border() -> u32 {
    10
}

impl Default for OverlayBox {
    fn default() -> Self {
        Self {
            color: default_box_color(),
            opacity: default_box_opacity(),
            border: default_box_border(),
        }
    }
}

/// One text overlay scoped to a time window within its segment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextOverlay {
    /// Text to draw
    pub text: String,

    /// Window start relative to segment time, seconds, >= 0
    pub start: f64,

    /// Window end relative to segment time, seconds, > start
    pub end: f64,

    /// Font family or fontfile override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,

    /// Font size in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,

    /// Font color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Vertical placement
    #[serde(default)]
    pub position: OverlayPosition,

    /// Background box
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_style: Option<OverlayBox>,
}

impl TextOverlay {
    /// Create an overlay with defaults for styling.
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            font: None,
            size: None,
            color: None,
            position: OverlayPosition::default(),
            box_style: None,
        }
    }

    /// Window length, seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_defaults() {
        let doc = serde_json::json!({ "text": "Hello", "start": 0.0, "end": 2.0 });
        let overlay: TextOverlay = serde_json::from_value(doc).unwrap();
        assert_eq!(overlay.position, OverlayPosition::Bottom);
        assert!(overlay.box_style.is_none());
        assert!((overlay.duration() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_box_field_rename() {
        let doc = serde_json::json!({
            "text": "Hi", "start": 0.0, "end": 1.0,
            "box": { "color": "black", "opacity": 0.7 }
        });
        let overlay: TextOverlay = serde_json::from_value(doc).unwrap();
        let b = overlay.box_style.unwrap();
        assert!((b.opacity - 0.7).abs() < f64::EPSILON);
        assert_eq!(b.border, 10);
    }

    #[test]
    fn test_position_y_expressions() {
        assert!(OverlayPosition::Bottom.y_expr().contains("h-text_h"));
        assert!(OverlayPosition::Center.y_expr().contains("/2"));
    }
}
