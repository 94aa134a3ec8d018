//! Optional background task that evicts idle counters.
//!
//! Counters are never evicted unless a reaper is spawned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;

/// Handle to a running idle-counter reaper.
pub struct IdleReaper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IdleReaper {
    /// Spawn a reaper that sweeps `limiter` every `interval`, removing counters
    /// idle for at least `max_idle`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration, max_idle: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        info!(interval = ?interval, max_idle = ?max_idle, "Starting idle counter reaper");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match limiter.reap_idle(max_idle) {
                            Ok(0) => {}
                            Ok(removed) => debug!(removed, "Idle counters reaped"),
                            Err(e) => warn!(error = %e, "Idle counter sweep failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Idle counter reaper stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the reaper and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Idle counter reaper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::RateLimitConfig;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_idle_counters() {
        let clock = ManualClock::new();
        let limiter = Arc::new(RateLimiter::empty().with_clock(Arc::new(clock.clone())));
        limiter
            .set_limit("user:login", RateLimitConfig::new(5, Duration::from_secs(1)))
            .unwrap();

        limiter.allow("user:login:a").unwrap();
        assert_eq!(limiter.counter_count(), 1);

        let reaper = IdleReaper::spawn(
            Arc::clone(&limiter),
            Duration::from_secs(10),
            Duration::from_secs(5),
        );

        clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(limiter.counter_count(), 0);
        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn test_reaper_shutdown() {
        let limiter = Arc::new(RateLimiter::empty());
        let reaper = IdleReaper::spawn(limiter, Duration::from_secs(60), Duration::from_secs(60));
        reaper.shutdown().await;
    }
}
