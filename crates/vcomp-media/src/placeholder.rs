//! Deterministic placeholder image generation.
//!
//! Used by the image auto-fixer when search comes up empty: a solid canvas
//! matching the target format, optionally labeled, generated with the
//! lavfi `color` source so no asset needs to be shipped.

use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vcomp_models::OutputFormat;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::filters::escape_drawtext_text;

/// Background color for placeholder canvases.
const PLACEHOLDER_COLOR: &str = "0x1f2430";

/// Generate a placeholder PNG at `output` sized to the target canvas.
pub async fn generate_placeholder(
    output: &Path,
    format: &OutputFormat,
    label: Option<&str>,
    cancel: CancellationToken,
) -> MediaResult<()> {
    let mut cmd = FfmpegCommand::new(output).lavfi_input(format!(
        "color=c={}:s={}x{}:d=1",
        PLACEHOLDER_COLOR, format.width, format.height
    ));

    if let Some(label) = label {
        cmd = cmd.video_filter(format!(
            "drawtext=text='{}':fontsize={}:fontcolor=white@0.6:x=(w-text_w)/2:y=(h-text_h)/2",
            escape_drawtext_text(label),
            format.height / 12
        ));
    }

    let cmd = cmd.output_args(["-frames:v", "1"]);

    debug!(output = %output.display(), "Generating placeholder image");
    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(Duration::from_secs(30))
        .run(&cmd)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_command_shape() {
        let format = OutputFormat::default();
        let cmd = FfmpegCommand::new("/tmp/ph.png").lavfi_input(format!(
            "color=c={}:s={}x{}:d=1",
            PLACEHOLDER_COLOR, format.width, format.height
        ));
        let args = cmd.build_args();
        assert!(args.contains(&"color=c=0x1f2430:s=1920x1080:d=1".to_string()));
    }
}
