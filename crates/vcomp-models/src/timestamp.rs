//! Timestamp formatting and parsing for FFmpeg interop.

/// Format seconds as `HH:MM:SS.mmm` for FFmpeg.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0).floor() as u32;
    let minutes = ((seconds % 3600.0) / 60.0).floor() as u32;
    let secs = seconds % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}

/// Parse `HH:MM:SS`, `MM:SS` or plain-seconds timestamps into seconds.
pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let ts = ts.trim();
    let parts: Vec<&str> = ts.split(':').collect();
    match parts.len() {
        1 => parts[0].parse::<f64>().ok().filter(|v| *v >= 0.0),
        2 => {
            let minutes: f64 = parts[0].parse().ok()?;
            let seconds: f64 = parts[1].parse().ok()?;
            Some(minutes * 60.0 + seconds)
        }
        3 => {
            let hours: f64 = parts[0].parse().ok()?;
            let minutes: f64 = parts[1].parse().ok()?;
            let seconds: f64 = parts[2].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(61.5), "00:01:01.500");
        assert_eq!(format_timestamp(3723.25), "01:02:03.250");
        assert_eq!(format_timestamp(-1.0), "00:00:00.000");
    }

    #[test]
    fn test_parse_timestamp() {
        assert!((parse_timestamp("00:01:01.500").unwrap() - 61.5).abs() < 1e-9);
        assert!((parse_timestamp("01:30").unwrap() - 90.0).abs() < 1e-9);
        assert!((parse_timestamp("12.25").unwrap() - 12.25).abs() < 1e-9);
        assert!(parse_timestamp("not-a-time").is_none());
    }

    #[test]
    fn test_roundtrip() {
        for value in [0.0, 1.25, 59.999, 3600.5] {
            let formatted = format_timestamp(value);
            let parsed = parse_timestamp(&formatted).unwrap();
            assert!((parsed - value).abs() < 0.001, "{} -> {}", value, parsed);
        }
    }
}
