//! Human-readable elapsed time formatting
//!
//! Format selection by magnitude:
//! - `< 1s`      → `XXXms`
//! - `< 100s`    → `X.XXs`
//! - `< 100m`    → `M:SS.Xs`
//! - otherwise   → `H:MM:SS`

/// Thresholds in milliseconds
const MILLIS_FORMAT_MAX: u64 = 1_000;
const SHORT_FORMAT_MAX: u64 = 100_000;
const MEDIUM_FORMAT_MAX: u64 = 6_000_000;

/// Format an elapsed duration given in milliseconds
///
/// # Examples
///
/// ```
/// use prospector_common::human_time::format_elapsed_ms;
///
/// assert_eq!(format_elapsed_ms(250), "250ms");
/// assert_eq!(format_elapsed_ms(4_500), "4.50s");
/// assert_eq!(format_elapsed_ms(330_000), "5:30.0s");
/// assert_eq!(format_elapsed_ms(7_200_000), "2:00:00");
/// ```
pub fn format_elapsed_ms(ms: u64) -> String {
    if ms < MILLIS_FORMAT_MAX {
        format!("{}ms", ms)
    } else if ms < SHORT_FORMAT_MAX {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else if ms < MEDIUM_FORMAT_MAX {
        let minutes = ms / 60_000;
        let secs = (ms % 60_000) as f64 / 1000.0;
        format!("{}:{:04.1}s", minutes, secs)
    } else {
        let total_secs = ms / 1000;
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        let secs = total_secs % 60;
        format!("{}:{:02}:{:02}", hours, mins, secs)
    }
}

/// Format a [`std::time::Duration`]
pub fn format_duration(duration: std::time::Duration) -> String {
    format_elapsed_ms(duration.as_millis().min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_millis_format() {
        assert_eq!(format_elapsed_ms(0), "0ms");
        assert_eq!(format_elapsed_ms(999), "999ms");
    }

    #[test]
    fn test_short_format() {
        assert_eq!(format_elapsed_ms(1_000), "1.00s");
        assert_eq!(format_elapsed_ms(99_990), "99.99s");
    }

    #[test]
    fn test_medium_format() {
        assert_eq!(format_elapsed_ms(100_000), "1:40.0s");
        assert_eq!(format_elapsed_ms(5_999_000), "99:59.0s");
    }

    #[test]
    fn test_long_format() {
        assert_eq!(format_elapsed_ms(6_000_000), "1:40:00");
        assert_eq!(format_elapsed_ms(7_261_000), "2:01:01");
    }

    #[test]
    fn test_duration_wrapper() {
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
    }
}
