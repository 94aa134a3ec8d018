use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use turnstile::error::TurnstileError;
use turnstile::guard::{Operation, RateLimitGuard};
use turnstile::ratelimit::{
    LimitRegistry, ManualClock, PatternResolver, RateLimitConfig, RateLimiter, UNBOUNDED,
};

fn manual_limiter() -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new();
    let limiter = RateLimiter::from_parts(
        PatternResolver::new(),
        LimitRegistry::new(),
        Arc::new(clock.clone()),
    );
    (limiter, clock)
}

#[test]
fn test_login_scenario() {
    let (limiter, clock) = manual_limiter();
    limiter
        .set_limit("user:login", RateLimitConfig::new(3, Duration::from_secs(2)))
        .unwrap();
    let key = "user:login:a@x.com";

    for _ in 0..3 {
        assert!(limiter.allow(key).unwrap());
    }

    clock.advance(Duration::from_millis(100));
    assert!(!limiter.allow(key).unwrap());

    let status = limiter.status(key).unwrap();
    assert_eq!(status.limit, 3);
    assert_eq!(status.remaining, 0);
    assert_eq!(status.retry_after, Duration::from_secs(2));

    clock.advance(Duration::from_millis(2100));
    assert!(limiter.allow(key).unwrap());
    assert_eq!(limiter.status(key).unwrap().remaining, 2);
}

#[test]
fn test_replenishment_one_per_second() {
    let (limiter, clock) = manual_limiter();
    limiter
        .set_limit("user:update", RateLimitConfig::new(1, Duration::from_secs(1)))
        .unwrap();
    let key = "user:update:42";

    assert!(limiter.allow(key).unwrap());
    clock.advance(Duration::from_millis(500));
    assert!(!limiter.allow(key).unwrap());
    clock.advance(Duration::from_millis(600));
    assert!(limiter.allow(key).unwrap());
}

#[test]
fn test_quota_bound_under_contention_with_sliding_time() {
    let (limiter, clock) = manual_limiter();
    limiter
        .set_limit("user:read", RateLimitConfig::new(10, Duration::from_secs(1)))
        .unwrap();
    let admitted = AtomicU64::new(0);

    // Each round the clock moves by a tenth of the window; within any
    // window at most 10 admissions may be observed.
    let mut per_round = Vec::new();
    for _ in 0..30 {
        let before = admitted.load(Ordering::SeqCst);
        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        if limiter.allow("user:read:hot").unwrap() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        per_round.push(admitted.load(Ordering::SeqCst) - before);
        clock.advance(Duration::from_millis(100));
    }

    // A window of 1s starting at round i covers rounds i..i+10 (the entry
    // exactly on the cutoff is still counted).
    for window in per_round.windows(11) {
        assert!(window.iter().sum::<u64>() <= 10, "window exceeded: {:?}", window);
    }
    assert!(admitted.load(Ordering::SeqCst) >= 10);
}

#[test]
fn test_default_open_for_unregistered_pattern() {
    let (limiter, _clock) = manual_limiter();
    limiter
        .set_limit("user:login", RateLimitConfig::new(1, Duration::from_secs(60)))
        .unwrap();

    for _ in 0..10_000 {
        assert!(limiter.allow("user:read:42").unwrap());
    }
    let status = limiter.status("user:read:42").unwrap();
    assert_eq!(status.limit, UNBOUNDED);
    assert_eq!(status.remaining, UNBOUNDED);
}

#[test]
fn test_invalid_configs_rejected() {
    let (limiter, _clock) = manual_limiter();

    for config in [
        RateLimitConfig::new(0, Duration::from_secs(3600)),
        RateLimitConfig::new(5, Duration::ZERO),
    ] {
        assert!(matches!(
            limiter.set_limit("p", config),
            Err(TurnstileError::InvalidConfig { .. })
        ));
    }
    assert!(limiter.get_limit("p").unwrap().is_none());
}

#[test]
fn test_built_in_table() {
    let limiter = RateLimiter::new();
    let expected = [
        ("user:register", 5, 3600),
        ("user:login", 10, 900),
        ("user:read", 100, 60),
        ("user:update", 20, 3600),
        ("user:preferences:read", 50, 60),
        ("user:preferences:update", 10, 3600),
        ("default", 1000, 3600),
    ];

    for (pattern, limit, secs) in expected {
        let config = limiter.get_limit(pattern).unwrap().unwrap();
        assert_eq!(config.limit, limit, "{}", pattern);
        assert_eq!(config.window, Duration::from_secs(secs), "{}", pattern);
    }
}

#[tokio::test]
async fn test_guard_over_shared_limiter() {
    let limiter = Arc::new(RateLimiter::new());
    let guard = RateLimitGuard::new(Arc::clone(&limiter));

    for _ in 0..5 {
        guard.check(Operation::Register, "new@x.com").await.unwrap();
    }
    let err = guard
        .check(Operation::Register, "new@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::RateLimitExceeded { .. }));
    assert!(err.to_string().contains("registration"));

    assert_eq!(limiter.status("user:register:new@x.com").unwrap().remaining, 0);
}
