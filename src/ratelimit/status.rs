//! Point-in-time rate limit status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sentinel for `limit` and `remaining` when no rule applies.
pub const UNBOUNDED: i64 = -1;

/// Snapshot of a key's quota. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// The key this status describes
    pub key: String,
    /// Admissions allowed per window, or [`UNBOUNDED`]
    pub limit: i64,
    /// Admissions left in the current window, or [`UNBOUNDED`]
    pub remaining: i64,
    /// When a full window will have elapsed from now
    pub reset_time: DateTime<Utc>,
    /// How long to wait before retrying; zero while quota remains
    #[serde(with = "duration_secs")]
    pub retry_after: Duration,
    /// Length of the window; zero when unbounded
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl RateLimitStatus {
    /// Status for a key whose pattern has no rule.
    pub fn unbounded(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            limit: UNBOUNDED,
            remaining: UNBOUNDED,
            reset_time: now,
            retry_after: Duration::ZERO,
            window: Duration::ZERO,
        }
    }

    /// Status for a key with `used` admissions inside a `limit`/`window` rule.
    pub fn bounded(key: &str, limit: u64, window: Duration, used: u64, now: DateTime<Utc>) -> Self {
        let remaining = limit.saturating_sub(used);
        let reset_time = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key: key.to_string(),
            limit: clamp_i64(limit),
            remaining: clamp_i64(remaining),
            reset_time,
            retry_after: if remaining == 0 { window } else { Duration::ZERO },
            window,
        }
    }

    /// Whether no rule applies to this key.
    pub fn is_unbounded(&self) -> bool {
        self.limit == UNBOUNDED
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_status() {
        let now = Utc::now();
        let status = RateLimitStatus::unbounded("order:create:1", now);

        assert!(status.is_unbounded());
        assert_eq!(status.remaining, UNBOUNDED);
        assert_eq!(status.retry_after, Duration::ZERO);
    }

    #[test]
    fn test_bounded_with_quota_left() {
        let now = Utc::now();
        let status = RateLimitStatus::bounded("k", 5, Duration::from_secs(60), 2, now);

        assert_eq!(status.limit, 5);
        assert_eq!(status.remaining, 3);
        assert_eq!(status.retry_after, Duration::ZERO);
        assert_eq!((status.reset_time - now).num_seconds(), 60);
    }

    #[test]
    fn test_bounded_exhausted() {
        let now = Utc::now();
        let status = RateLimitStatus::bounded("k", 3, Duration::from_secs(2), 3, now);

        assert_eq!(status.remaining, 0);
        assert_eq!(status.retry_after, Duration::from_secs(2));
    }

    #[test]
    fn test_serialize_json() {
        let now = Utc::now();
        let status = RateLimitStatus::bounded("k", 3, Duration::from_millis(1500), 1, now);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["remaining"], 2);
        assert_eq!(json["window"], 1.5);
        assert_eq!(json["retry_after"], 0.0);
    }
}
