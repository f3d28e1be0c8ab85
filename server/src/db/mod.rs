#[cfg(test)]
pub(crate) mod fixtures;
pub mod models;
pub mod pool;
pub mod queries;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage. Fixed-width RFC 3339 with milliseconds,
/// so text ordering in SQL matches chronological ordering.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Returns `None` for malformed values.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_keeps_millis() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(250);
        let raw = format_timestamp(at);
        assert_eq!(raw, "2026-03-01T12:30:05.250Z");
        assert_eq!(parse_timestamp(&raw), Some(at));
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(format_timestamp(early) < format_timestamp(late));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
