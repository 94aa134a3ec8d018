//! Core rate limiter implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::counter::SlidingWindowLog;
use super::pattern::PatternResolver;
use super::rules::{LimitRegistry, RateLimitConfig, RuleSet};
use super::status::RateLimitStatus;
use crate::error::{Result, TurnstileError};

/// The admission engine.
///
/// Resolves each key to a pattern, looks up that pattern's rule and admits or
/// denies against the key's own sliding-window log. Keys whose pattern has no
/// rule are always admitted.
///
/// Locking is two-level: `counters` guards the map itself and each
/// [`SlidingWindowLog`] guards its own entries. The map read lock is held for
/// the whole per-key critical section, so removing a counter (reset, reaping)
/// waits for in-flight admissions on it.
pub struct RateLimiter {
    /// Key to pattern mapping
    resolver: PatternResolver,
    /// Pattern to rule mapping
    registry: LimitRegistry,
    /// Sliding-window logs indexed by key
    counters: RwLock<HashMap<String, SlidingWindowLog>>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter with the built-in rules and the system clock.
    pub fn new() -> Self {
        Self::from_parts(
            PatternResolver::new(),
            LimitRegistry::with_defaults(),
            Arc::new(SystemClock),
        )
    }

    /// Create a rate limiter with no rules. Every key is admitted until a
    /// rule is set.
    pub fn empty() -> Self {
        Self::from_parts(
            PatternResolver::new(),
            LimitRegistry::new(),
            Arc::new(SystemClock),
        )
    }

    /// Create a rate limiter from a rules document.
    ///
    /// Patterns declared in the document become resolvable prefixes.
    pub fn from_rules(rules: &RuleSet) -> Result<Self> {
        let limiter = Self::from_parts(
            PatternResolver::with_patterns(rules.patterns()),
            LimitRegistry::new(),
            Arc::new(SystemClock),
        );
        limiter.replace_rules(rules)?;
        Ok(limiter)
    }

    /// Assemble a rate limiter from its components.
    pub fn from_parts(
        resolver: PatternResolver,
        registry: LimitRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            registry,
            counters: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether one more operation on `key` may proceed.
    ///
    /// Returns `Ok(false)` on deny. Denied calls do not consume quota.
    pub fn allow(&self, key: &str) -> Result<bool> {
        let pattern = self.resolver.resolve(key);
        let Some(config) = self.registry.get_limit(pattern)? else {
            trace!(key = %key, pattern = %pattern, "No rule for pattern, admitting");
            return Ok(true);
        };

        trace!(
            key = %key,
            pattern = %pattern,
            limit = config.limit,
            "Checking rate limit"
        );

        let allowed = {
            let counters = self
                .counters
                .read()
                .map_err(|_| TurnstileError::poisoned("counter map"))?;

            match counters.get(key) {
                Some(log) => Some(log.try_acquire(self.clock.now(), &config)?),
                None => None,
            }
        };

        let allowed = match allowed {
            Some(allowed) => allowed,
            None => self.create_and_acquire(key, &config)?,
        };

        if !allowed {
            debug!(key = %key, pattern = %pattern, limit = config.limit, "Rate limit exceeded");
        }
        Ok(allowed)
    }

    /// Slow path for a key seen for the first time.
    fn create_and_acquire(&self, key: &str, config: &RateLimitConfig) -> Result<bool> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| TurnstileError::poisoned("counter map"))?;

        let now = self.clock.now();
        let log = counters.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = config.limit,
                window = ?config.window,
                "Creating new rate limit counter"
            );
            SlidingWindowLog::new(now)
        });
        log.try_acquire(now, config)
    }

    /// Forget everything recorded for `key`. Succeeds for unknown keys.
    pub fn reset(&self, key: &str) -> Result<()> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| TurnstileError::poisoned("counter map"))?;
        if counters.remove(key).is_some() {
            debug!(key = %key, "Rate limit counter reset");
        }
        Ok(())
    }

    /// Report the current quota for `key` without recording anything.
    pub fn status(&self, key: &str) -> Result<RateLimitStatus> {
        let pattern = self.resolver.resolve(key);
        let wall = self.clock.wall_now();
        let Some(config) = self.registry.get_limit(pattern)? else {
            return Ok(RateLimitStatus::unbounded(key, wall));
        };

        let used = {
            let counters = self
                .counters
                .read()
                .map_err(|_| TurnstileError::poisoned("counter map"))?;
            match counters.get(key) {
                Some(log) => log.count_within(self.clock.now(), config.window)?,
                None => 0,
            }
        };

        Ok(RateLimitStatus::bounded(
            key,
            config.limit,
            config.window,
            used,
            wall,
        ))
    }

    /// Insert or replace the rule for `pattern`.
    pub fn set_limit(&self, pattern: &str, config: RateLimitConfig) -> Result<()> {
        self.registry.set_limit(pattern, config)
    }

    /// Look up the rule for `pattern`.
    pub fn get_limit(&self, pattern: &str) -> Result<Option<RateLimitConfig>> {
        self.registry.get_limit(pattern)
    }

    /// Remove the rule for `pattern`. Idempotent.
    pub fn remove_limit(&self, pattern: &str) -> Result<()> {
        self.registry.remove_limit(pattern)
    }

    /// All rules, sorted by pattern.
    pub fn limits(&self) -> Result<Vec<(String, RateLimitConfig)>> {
        self.registry.snapshot()
    }

    /// Validate a rules document and merge every rule in it into the current
    /// table. Rules not mentioned in the document are left alone.
    ///
    /// Nothing is applied if any rule is invalid. Returns the number of rules set.
    pub fn apply_rules(&self, rules: &RuleSet) -> Result<usize> {
        let validated = rules.validated()?;

        for (pattern, _) in &validated {
            self.warn_if_unresolvable(pattern);
        }
        for (pattern, config) in &validated {
            self.registry.set_limit(pattern, *config)?;
        }

        info!(rules = validated.len(), "Rate limit rules applied");
        Ok(validated.len())
    }

    /// Make the rule table exactly what a rules document describes.
    ///
    /// The built-in table is included only when the document asks for it.
    /// Rules absent from the document are removed. On error the previous
    /// table stays in force. Returns the number of rules now registered.
    pub fn replace_rules(&self, rules: &RuleSet) -> Result<usize> {
        let table = rules.to_table()?;

        for pattern in table.keys() {
            self.warn_if_unresolvable(pattern);
        }
        let count = table.len();
        self.registry.replace_all(table)?;
        Ok(count)
    }

    /// Re-read a rules file and replace the rule table with its contents.
    ///
    /// Counters are kept; the new rules apply from the next decision.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let rules = RuleSet::from_file(path)?;
        self.replace_rules(&rules)
    }

    fn warn_if_unresolvable(&self, pattern: &str) {
        if self.resolver.resolve(pattern) != pattern {
            warn!(
                pattern = %pattern,
                "Rule pattern is not a known prefix; no key will resolve to it"
            );
        }
    }

    /// Key to pattern resolution used by this limiter.
    pub fn resolve_pattern<'a>(&'a self, key: &str) -> &'a str {
        self.resolver.resolve(key)
    }

    /// Remove counters that have been idle for at least `max_idle` and hold no
    /// entries inside their current window. Returns the number removed.
    pub fn reap_idle(&self, max_idle: Duration) -> Result<usize> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| TurnstileError::poisoned("counter map"))?;
        let now = self.clock.now();

        let mut stale = Vec::new();
        for (key, log) in counters.iter() {
            if log.idle_for(now)? < max_idle {
                continue;
            }
            let live = match self.registry.get_limit(self.resolver.resolve(key))? {
                Some(config) => log.count_within(now, config.window)?,
                None => 0,
            };
            if live == 0 {
                stale.push(key.clone());
            }
        }

        for key in &stale {
            counters.remove(key);
        }

        if !stale.is_empty() {
            debug!(removed = stale.len(), remaining = counters.len(), "Reaped idle counters");
        }
        Ok(stale.len())
    }

    /// Get the number of active counters.
    pub fn counter_count(&self) -> usize {
        self.counters
            .read()
            .map(|counters| counters.len())
            .unwrap_or_default()
    }

    /// Clear all counters.
    pub fn clear(&self) -> Result<()> {
        let mut counters = self
            .counters
            .write()
            .map_err(|_| TurnstileError::poisoned("counter map"))?;
        counters.clear();
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
