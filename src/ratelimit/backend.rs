//! Async service seam consumed by collaborating layers.

use async_trait::async_trait;

use super::limiter::RateLimiter;
use super::rules::RateLimitConfig;
use super::status::RateLimitStatus;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// Decorators around user operations depend on this trait rather than on
/// [`RateLimiter`] directly. Dropping a returned future cancels the call
/// before it reaches the engine; an admission already in progress always
/// completes.
#[async_trait]
pub trait RateLimitService: Send + Sync {
    /// Decide whether one more operation on `key` may proceed.
    async fn allow(&self, key: &str) -> Result<bool>;

    /// Forget everything recorded for `key`.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Current quota for `key`.
    async fn get_status(&self, key: &str) -> Result<RateLimitStatus>;

    /// Insert or replace the rule for `pattern`.
    async fn set_limit(&self, pattern: &str, config: RateLimitConfig) -> Result<()>;

    /// Look up the rule for `pattern`.
    async fn get_limit(&self, pattern: &str) -> Result<Option<RateLimitConfig>>;

    /// Remove the rule for `pattern`.
    async fn remove_limit(&self, pattern: &str) -> Result<()>;
}

#[async_trait]
impl RateLimitService for RateLimiter {
    async fn allow(&self, key: &str) -> Result<bool> {
        RateLimiter::allow(self, key)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        RateLimiter::reset(self, key)
    }

    async fn get_status(&self, key: &str) -> Result<RateLimitStatus> {
        self.status(key)
    }

    async fn set_limit(&self, pattern: &str, config: RateLimitConfig) -> Result<()> {
        RateLimiter::set_limit(self, pattern, config)
    }

    async fn get_limit(&self, pattern: &str) -> Result<Option<RateLimitConfig>> {
        RateLimiter::get_limit(self, pattern)
    }

    async fn remove_limit(&self, pattern: &str) -> Result<()> {
        RateLimiter::remove_limit(self, pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_service_round_trip_through_trait_object() {
        let service: Arc<dyn RateLimitService> = Arc::new(RateLimiter::empty());

        service
            .set_limit("user:login", RateLimitConfig::new(1, Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(
            service.get_limit("user:login").await.unwrap(),
            Some(RateLimitConfig::new(1, Duration::from_secs(60)))
        );

        assert!(service.allow("user:login:a").await.unwrap());
        assert!(!service.allow("user:login:a").await.unwrap());
        assert_eq!(service.get_status("user:login:a").await.unwrap().remaining, 0);

        service.reset("user:login:a").await.unwrap();
        assert!(service.allow("user:login:a").await.unwrap());

        service.remove_limit("user:login").await.unwrap();
        assert!(service.get_limit("user:login").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_tasks_respect_limit() {
        let limiter = Arc::new(RateLimiter::empty());
        limiter
            .set_limit("user:read", RateLimitConfig::new(10, Duration::from_secs(60)))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                RateLimitService::allow(&*limiter, "user:read:1").await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
