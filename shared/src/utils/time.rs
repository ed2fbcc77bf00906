//! Time-related utilities

use chrono::{DateTime, NaiveDateTime, Utc};

const SQL_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an ingestion timestamp.
///
/// Accepts RFC 3339 (`2025-07-14T10:42:00Z`, `2025-07-14T10:42:00-03:00`) and the
/// offset-less forms `2025-07-14 10:42:00` / `2025-07-14T10:42:00`, which are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.replacen('T', " ", 1);
    let naive = naive.split('.').next().unwrap_or(&naive);
    NaiveDateTime::parse_from_str(naive, SQL_DATETIME)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Format a timestamp at second resolution (`2025-07-14 10:42:00`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(SQL_DATETIME).to_string()
}

/// Convert a chrono timestamp to milliseconds since the Unix epoch.
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Convert milliseconds since the Unix epoch back to a timestamp.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
