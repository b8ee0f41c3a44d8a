//! FFmpeg progress reporting.

/// Progress snapshot parsed from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Encoding speed in frames per second
    pub fps: f64,
    /// Output timestamp in milliseconds
    pub out_time_ms: i64,
    /// Output timestamp as `HH:MM:SS.micros`
    pub out_time: String,
    /// Encoding speed relative to realtime (e.g. 1.5 for "1.5x")
    pub speed: f64,
    /// True once FFmpeg reported `progress=end`
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output position in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_time_secs() {
        let progress = FfmpegProgress {
            out_time_ms: 2500,
            ..FfmpegProgress::default()
        };
        assert!((progress.out_time_secs() - 2.5).abs() < 1e-9);
    }
}
