//! Shared rendering helpers for CLI commands.

/// Formats milliseconds as a duration string.
/// Returns "Xh Ym" if >= 1 hour, "Xm" if < 1 hour.
/// Negative durations are treated as 0m.
#[must_use]
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().min(10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_hours_and_minutes() {
        assert_eq!(format_duration(9_000_000), "2h 30m");
        assert_eq!(format_duration(3_600_000), "1h 0m");
        assert_eq!(format_duration(5_400_000), "1h 30m");
    }

    #[test]
    fn format_duration_minutes_only() {
        assert_eq!(format_duration(2_700_000), "45m");
        assert_eq!(format_duration(60_000), "1m");
        assert_eq!(format_duration(0), "0m");
    }

    #[test]
    fn format_duration_floors_seconds() {
        assert_eq!(format_duration(2_754_000), "45m");
    }

    #[test]
    fn format_duration_negative_is_zero() {
        assert_eq!(format_duration(-1), "0m");
        assert_eq!(format_duration(-3_600_000), "0m");
    }

    #[test]
    fn progress_bar_full_and_partial() {
        assert_eq!(progress_bar(100, 100), "██████████");
        assert_eq!(progress_bar(50, 100), "█████░░░░░");
        assert_eq!(progress_bar(20, 100), "██░░░░░░░░");
    }

    #[test]
    fn progress_bar_minimum_visibility() {
        assert_eq!(progress_bar(4, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
    }

    #[test]
    fn progress_bar_zero_max() {
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
    }
}
