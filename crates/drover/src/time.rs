//! Timestamp helpers.
//!
//! All persisted timestamps use fixed-width RFC 3339 UTC with microsecond
//! precision so that string comparison in SQL matches chronological order.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Current time as a stored timestamp.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Format a time as a stored timestamp.
pub fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Timestamp `secs` seconds in the past, for timeout cutoffs.
pub fn cutoff_ts(now: DateTime<Utc>, secs: u64) -> String {
    format_ts(now - Duration::seconds(secs as i64))
}
