//! Sliding-window log counter.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::rules::RateLimitConfig;
use crate::error::{Result, TurnstileError};

/// Per-key log of admitted events.
///
/// Each log owns its own lock so that admissions on different keys never
/// contend. Stale entries are pruned lazily on access.
#[derive(Debug)]
pub struct SlidingWindowLog {
    state: Mutex<LogState>,
}

#[derive(Debug)]
struct LogState {
    /// Admission timestamps, oldest first
    entries: VecDeque<Instant>,
    /// Last time the log was touched by an admission attempt
    last_seen: Instant,
}

impl SlidingWindowLog {
    /// Create an empty log.
    pub fn new(now: Instant) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
                last_seen: now,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>> {
        self.state
            .lock()
            .map_err(|_| TurnstileError::poisoned("counter"))
    }

    /// Prune, check and conditionally record an admission at `now`.
    ///
    /// Returns `true` if the event was admitted. A denied event is not recorded.
    pub fn try_acquire(&self, now: Instant, config: &RateLimitConfig) -> Result<bool> {
        let mut state = self.lock()?;
        // Callers read the clock before taking the lock; keep the log ordered.
        let now = state.entries.back().map_or(now, |last| now.max(*last));
        state.last_seen = now;
        prune(&mut state.entries, now, config.window);

        if (state.entries.len() as u64) < config.limit {
            state.entries.push_back(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Number of entries inside the window ending at `now`. Does not mutate.
    pub fn count_within(&self, now: Instant, window: Duration) -> Result<u64> {
        let state = self.lock()?;
        let count = match now.checked_sub(window) {
            Some(cutoff) => state.entries.iter().filter(|t| **t >= cutoff).count(),
            None => state.entries.len(),
        };
        Ok(count as u64)
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.entries.clear();
        Ok(())
    }

    /// Time since the log was last touched.
    pub fn idle_for(&self, now: Instant) -> Result<Duration> {
        Ok(now.saturating_duration_since(self.lock()?.last_seen))
    }

    /// Raw number of stored entries, including ones not yet pruned.
    #[cfg(test)]
    fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    #[cfg(test)]
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Discard entries strictly older than `now - window`.
fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while entries.front().is_some_and(|t| *t < cutoff) {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: u64, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig::new(limit, Duration::from_millis(window_ms))
    }

    #[test]
    fn test_acquire_within_limit() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(3, 1000);

        for _ in 0..3 {
            assert!(log.try_acquire(t0, &config).unwrap());
        }
        assert_eq!(log.count_within(t0, config.window).unwrap(), 3);
    }

    #[test]
    fn test_deny_does_not_record() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(2, 1000);

        assert!(log.try_acquire(t0, &config).unwrap());
        assert!(log.try_acquire(t0, &config).unwrap());
        assert!(!log.try_acquire(t0, &config).unwrap());
        assert!(!log.try_acquire(t0, &config).unwrap());

        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_window_slides() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(2, 1000);

        assert!(log.try_acquire(t0, &config).unwrap());
        assert!(log.try_acquire(t0 + Duration::from_millis(600), &config).unwrap());
        assert!(!log.try_acquire(t0 + Duration::from_millis(900), &config).unwrap());

        // The t0 entry falls out; the 600ms one is still inside.
        let t = t0 + Duration::from_millis(1100);
        assert!(log.try_acquire(t, &config).unwrap());
        assert!(!log.try_acquire(t, &config).unwrap());
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_entry_on_cutoff_is_kept() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(1, 1000);

        assert!(log.try_acquire(t0, &config).unwrap());
        assert!(!log.try_acquire(t0 + Duration::from_millis(1000), &config).unwrap());
        assert!(log.try_acquire(t0 + Duration::from_millis(1001), &config).unwrap());
    }

    #[test]
    fn test_count_within_is_read_only() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(5, 1000);

        log.try_acquire(t0, &config).unwrap();
        log.try_acquire(t0 + Duration::from_millis(500), &config).unwrap();

        let later = t0 + Duration::from_millis(1200);
        assert_eq!(log.count_within(later, config.window).unwrap(), 1);
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_clear_and_idle() {
        let t0 = Instant::now();
        let log = SlidingWindowLog::new(t0);
        let config = config(5, 1000);

        log.try_acquire(t0, &config).unwrap();
        log.clear().unwrap();
        assert!(log.is_empty().unwrap());

        assert_eq!(
            log.idle_for(t0 + Duration::from_secs(3)).unwrap(),
            Duration::from_secs(3)
        );
    }
}
