//! Epoch-millisecond clock helpers.
//!
//! Every stateful component takes `now_ms` explicitly so that windows and TTLs
//! can be driven deterministically from tests. Only the binary reads the wall
//! clock.

use std::time::{SystemTime, UNIX_EPOCH};

pub const SECOND_MS: u64 = 1_000;
pub const MINUTE_MS: u64 = 60 * SECOND_MS;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// `true` when `timestamp_ms` is more than `max_age_ms` before `now_ms`.
///
/// Timestamps in the future are never stale.
#[must_use]
pub fn is_older_than(timestamp_ms: u64, now_ms: u64, max_age_ms: u64) -> bool {
    now_ms.saturating_sub(timestamp_ms) > max_age_ms
}

/// RFC 3339 rendering of an epoch-millisecond timestamp (UTC).
#[must_use]
pub fn format_rfc3339(timestamp_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms as i64)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_is_strictly_greater_than() {
        assert!(!is_older_than(1_000, 11_000, 10_000));
        assert!(is_older_than(1_000, 11_001, 10_000));
        assert!(!is_older_than(20_000, 11_000, 10_000));
    }

    #[test]
    fn formats_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_rfc3339(DAY_MS), "1970-01-02T00:00:00Z");
    }
}
