//! Time helpers for lanlockd
//!
//! Timestamps are wall-clock `DateTime<Local>` throughout and are stored as
//! RFC 3339 text. Everything time-sensitive in the store and engine takes
//! `now` as a parameter so liveness sweeps and exam deadlines are testable
//! without sleeping.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Get the current local time.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Parse an RFC 3339 timestamp as stored in the database.
///
/// Returns `None` on malformed input rather than failing the row.
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .ok()
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn rfc3339_round_trip() {
        let t = now();
        let parsed = parse_rfc3339(&t.to_rfc3339()).unwrap();
        assert_eq!(t.timestamp_millis(), parsed.timestamp_millis());
    }

    #[test]
    fn rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("not a timestamp").is_none());
        assert!(parse_rfc3339("").is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn now_returns_reasonable_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }
}
