//! Time utilities for timelock
//!
//! All countdown math in timelock is driven by wall-clock deltas rather than
//! tick counts, so a suspended process that resumes recomputes the right
//! remaining time instead of losing or over-counting seconds.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TIMELOCK_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TIMELOCK_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between the mock clock and the real one, fixed at first use
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

/// Parse a `TIMELOCK_MOCK_TIME` value as a local instant
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn parse_mock_time(value: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), MOCK_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

#[cfg(debug_assertions)]
#[allow(clippy::disallowed_methods)]
fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        let value = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        match parse_mock_time(&value) {
            Some(mock) => {
                let offset = mock.signed_duration_since(chrono::Local::now());
                tracing::info!(mock_time = %value, offset_secs = offset.num_seconds(), "Mock time enabled");
                Some(offset)
            }
            None => {
                tracing::warn!(mock_time = %value, expected_format = MOCK_TIME_FORMAT, "Ignoring invalid mock time");
                None
            }
        }
    })
}

#[cfg(not(debug_assertions))]
fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| None)
}

/// Current local time. Debug builds honour `TIMELOCK_MOCK_TIME`.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real = chrono::Local::now();
    mock_time_offset().map_or(real, |offset| real + offset)
}

/// Whole seconds elapsed from `since` to `now`.
///
/// Saturates at zero when `now` is earlier than `since` (clock stepped
/// backwards); callers treat that as "no time has passed".
pub fn elapsed_secs(since: DateTime<Local>, now: DateTime<Local>) -> u64 {
    let delta = now.signed_duration_since(since).num_seconds();
    u64::try_from(delta).unwrap_or(0)
}

/// `at + secs`, or `None` if the result is not representable.
pub fn checked_add_secs(at: DateTime<Local>, secs: u64) -> Option<DateTime<Local>> {
    let secs = i64::try_from(secs).ok()?;
    chrono::Duration::try_seconds(secs).and_then(|d| at.checked_add_signed(d))
}

/// Storage key fragment for a calendar day (`YYYY-MM-DD`)
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Format a remaining-time countdown as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_countdown(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_elapsed_secs() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap();
        let later = Local.with_ymd_and_hms(2025, 12, 25, 14, 15, 0).unwrap();

        assert_eq!(elapsed_secs(start, later), 900);
        assert_eq!(elapsed_secs(start, start), 0);
    }

    #[test]
    fn test_elapsed_secs_clock_backwards() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap();
        let earlier = Local.with_ymd_and_hms(2025, 12, 25, 13, 0, 0).unwrap();

        assert_eq!(elapsed_secs(start, earlier), 0);
    }

    #[test]
    fn test_checked_add_secs() {
        let start = Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap();
        let later = checked_add_secs(start, 3600).unwrap();
        assert_eq!(elapsed_secs(start, later), 3600);
        assert!(checked_add_secs(start, u64::MAX).is_none());
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "0:00");
        assert_eq!(format_countdown(65), "1:05");
        assert_eq!(format_countdown(900), "15:00");
        assert_eq!(format_countdown(3661), "1:01:01");
    }

    #[test]
    fn test_day_key() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(day_key(day), "2025-03-07");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_parse_mock_time() {
        let parsed = parse_mock_time("2025-12-25 14:30:00").unwrap();
        assert_eq!(parsed, Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 0).unwrap());
        assert!(parse_mock_time("christmas").is_none());
        assert!(parse_mock_time("2025-12-25").is_none());
    }
}
