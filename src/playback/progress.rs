//! Progress bar, seek, and volume arithmetic.

/// Formats seconds as `m:ss`. Non-finite or negative input renders `0:00`.
pub fn format_time(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0:00".to_string();
    }
    let whole = secs.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// Played share of the track in percent, once the duration is known.
pub fn progress_percent(current_secs: f64, duration_secs: f64) -> Option<f64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return None;
    }
    Some((current_secs / duration_secs * 100.0).clamp(0.0, 100.0))
}

/// Maps a click position on the progress bar to a seek target in seconds.
pub fn seek_target(fraction: f64, duration_secs: f64) -> Option<f64> {
    if !fraction.is_finite() || !duration_secs.is_finite() || duration_secs <= 0.0 {
        return None;
    }
    Some(fraction.clamp(0.0, 1.0) * duration_secs)
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(9.99), "0:09");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(3_600.0), "60:00");
        assert_eq!(format_time(f64::NAN), "0:00");
        assert_eq!(format_time(f64::INFINITY), "0:00");
    }

    #[test]
    fn test_progress_percent_requires_known_duration() {
        assert_eq!(progress_percent(5.0, 0.0), None);
        assert_eq!(progress_percent(5.0, f64::NAN), None);
        assert_eq!(progress_percent(30.0, 120.0), Some(25.0));
        assert_eq!(progress_percent(500.0, 120.0), Some(100.0));
    }

    #[test]
    fn test_seek_target_clamps_fraction() {
        assert_eq!(seek_target(0.5, 200.0), Some(100.0));
        assert_eq!(seek_target(1.7, 200.0), Some(200.0));
        assert_eq!(seek_target(-0.2, 200.0), Some(0.0));
        assert_eq!(seek_target(0.5, 0.0), None);
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(0.4), 0.4);
        assert_eq!(clamp_volume(2.0), 1.0);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 1.0);
    }
}
