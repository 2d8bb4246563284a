//! Timestamp handling. All times are UTC, persisted as RFC 3339 text with a
//! trailing `Z` so stored values order lexicographically and window queries
//! can compare strings directly.

use crate::error::OpsResult;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};

/// Canonical storage form: `2026-08-21T12:30:00Z`.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(raw: &str) -> OpsResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw).map(|d| d.with_timezone(&Utc))?)
}

/// Whole days elapsed from `earlier` to `now`. Clock skew clamps to 0.
pub fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - earlier).num_days().max(0)
}

/// Calendar-day bucket key (UTC), e.g. "2026-08-21".
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Midnight UTC of the day containing `at`.
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}
