//! Rate limit rules and the pattern registry.
//!
//! Rules map a pattern (see [`super::pattern`]) to a [`RateLimitConfig`]. The
//! registry starts from a built-in default table and can be changed at runtime;
//! changes apply to the next admission decision only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::pattern::{
    DEFAULT_PATTERN, USER_LOGIN, USER_PREFERENCES_READ, USER_PREFERENCES_UPDATE, USER_READ,
    USER_REGISTER, USER_UPDATE,
};
use crate::error::{Result, TurnstileError};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Built-in rule table: (pattern, limit, window in seconds).
pub const DEFAULT_LIMITS: [(&str, u64, u64); 7] = [
    (USER_REGISTER, 5, HOUR),
    (USER_LOGIN, 10, 15 * MINUTE),
    (USER_READ, 100, MINUTE),
    (USER_UPDATE, 20, HOUR),
    (USER_PREFERENCES_READ, 50, MINUTE),
    (USER_PREFERENCES_UPDATE, 10, HOUR),
    (DEFAULT_PATTERN, 1000, HOUR),
];

/// At most `limit` admissions per sliding `window`.
///
/// Both fields must be positive; the registry refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions per window
    pub limit: u64,
    /// Length of the sliding window
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Check the config as a rule for `pattern`.
    pub fn validate(&self, pattern: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::invalid_config(pattern, "limit must be positive"));
        }
        if self.window.is_zero() {
            return Err(TurnstileError::invalid_config(pattern, "window must be positive"));
        }
        Ok(())
    }
}

/// Thread-safe mapping from pattern to its rule.
#[derive(Debug, Default)]
pub struct LimitRegistry {
    limits: RwLock<HashMap<String, RateLimitConfig>>,
}

impl LimitRegistry {
    /// Create an empty registry. Every pattern is unrestricted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with [`DEFAULT_LIMITS`].
    pub fn with_defaults() -> Self {
        Self {
            limits: RwLock::new(default_table()),
        }
    }

    /// Insert or replace the rule for a pattern.
    pub fn set_limit(&self, pattern: &str, config: RateLimitConfig) -> Result<()> {
        if let Err(e) = config.validate(pattern) {
            warn!(pattern = %pattern, error = %e, "Rejected rate limit rule");
            return Err(e);
        }

        let mut limits = self
            .limits
            .write()
            .map_err(|_| TurnstileError::poisoned("limit registry"))?;
        let previous = limits.insert(pattern.to_string(), config);

        info!(
            pattern = %pattern,
            limit = config.limit,
            window = ?config.window,
            replaced = previous.is_some(),
            "Rate limit rule set"
        );
        Ok(())
    }

    /// Look up the rule for a pattern.
    pub fn get_limit(&self, pattern: &str) -> Result<Option<RateLimitConfig>> {
        let limits = self
            .limits
            .read()
            .map_err(|_| TurnstileError::poisoned("limit registry"))?;
        Ok(limits.get(pattern).copied())
    }

    /// Remove the rule for a pattern. Removing an absent pattern is a no-op.
    pub fn remove_limit(&self, pattern: &str) -> Result<()> {
        let mut limits = self
            .limits
            .write()
            .map_err(|_| TurnstileError::poisoned("limit registry"))?;
        if limits.remove(pattern).is_some() {
            info!(pattern = %pattern, "Rate limit rule removed");
        } else {
            debug!(pattern = %pattern, "No rate limit rule to remove");
        }
        Ok(())
    }

    /// Swap in a whole new rule table. Patterns absent from `limits` lose
    /// their rule. Every rule is checked before anything changes.
    pub fn replace_all(&self, limits: HashMap<String, RateLimitConfig>) -> Result<()> {
        for (pattern, config) in &limits {
            config.validate(pattern)?;
        }

        let mut current = self
            .limits
            .write()
            .map_err(|_| TurnstileError::poisoned("limit registry"))?;
        let dropped = current.keys().filter(|p| !limits.contains_key(*p)).count();
        *current = limits;

        info!(rules = current.len(), dropped, "Rate limit rules replaced");
        Ok(())
    }

    /// Snapshot of all rules, sorted by pattern.
    pub fn snapshot(&self) -> Result<Vec<(String, RateLimitConfig)>> {
        let limits = self
            .limits
            .read()
            .map_err(|_| TurnstileError::poisoned("limit registry"))?;
        let mut rules: Vec<_> = limits.iter().map(|(p, c)| (p.clone(), *c)).collect();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rules)
    }
}

fn default_table() -> HashMap<String, RateLimitConfig> {
    DEFAULT_LIMITS
        .iter()
        .map(|&(pattern, limit, secs)| {
            (
                pattern.to_string(),
                RateLimitConfig::new(limit, Duration::from_secs(secs)),
            )
        })
        .collect()
}

/// A rules document as loaded from YAML.
///
/// ```yaml
/// include_defaults: true
/// limits:
///   - pattern: user:login
///     limit: 3
///     window: 2s
///   - pattern: api:search
///     limit: 100
///     window_secs: 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Whether the built-in table is kept underneath these rules
    #[serde(default = "default_include_defaults")]
    pub include_defaults: bool,
    /// Explicit rules
    #[serde(default)]
    pub limits: Vec<RuleEntry>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            include_defaults: default_include_defaults(),
            limits: Vec::new(),
        }
    }
}

fn default_include_defaults() -> bool {
    true
}

/// One rule in a [`RuleSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Pattern this rule applies to
    pub pattern: String,
    /// Maximum admissions per window
    pub limit: u64,
    /// Window in seconds
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Window as a humane duration, e.g. `15m`; takes precedence over `window_secs`
    #[serde(default)]
    pub window: Option<String>,
}

impl RuleEntry {
    /// Validate this entry into a config.
    pub fn to_config(&self) -> Result<RateLimitConfig> {
        let window = match (&self.window, self.window_secs) {
            (Some(text), _) => humantime::parse_duration(text).map_err(|e| {
                TurnstileError::invalid_config(&self.pattern, format!("bad window '{}': {}", text, e))
            })?,
            (None, Some(secs)) => Duration::from_secs(secs),
            (None, None) => {
                return Err(TurnstileError::invalid_config(
                    &self.pattern,
                    "one of window or window_secs is required",
                ))
            }
        };
        let config = RateLimitConfig::new(self.limit, window);
        config.validate(&self.pattern)?;
        Ok(config)
    }
}

impl RuleSet {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Validate every entry. Fails on the first invalid one.
    pub fn validated(&self) -> Result<Vec<(String, RateLimitConfig)>> {
        self.limits
            .iter()
            .map(|entry| {
                entry.to_config().map(|c| (entry.pattern.clone(), c)).map_err(|e| {
                    warn!(pattern = %entry.pattern, error = %e, "Rejected rate limit rule");
                    e
                })
            })
            .collect()
    }

    /// The complete rule table this document describes: the built-in table
    /// when `include_defaults` is set, overlaid with the explicit rules.
    pub fn to_table(&self) -> Result<HashMap<String, RateLimitConfig>> {
        let mut table = if self.include_defaults {
            default_table()
        } else {
            HashMap::new()
        };
        table.extend(self.validated()?);
        Ok(table)
    }

    /// Patterns declared in this document.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.limits.iter().map(|entry| entry.pattern.as_str())
    }
}
