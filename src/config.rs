//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{RateLimiter, RuleSet};

/// Main configuration for the Turnstile engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to rate limit rules file; built-in rules are used when unset
    pub rules_path: Option<String>,

    /// Rules reload interval in seconds; 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub rules_reload_interval_secs: u64,

    /// Idle counter eviction
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            rules_reload_interval_secs: default_reload_interval(),
            reaper: ReaperConfig::default(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

/// Idle counter reaper configuration. Disabled unless asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether to evict idle counters at all
    #[serde(default)]
    pub enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,

    /// Minimum idle time before a counter may be evicted, in seconds
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reaper_interval(),
            max_idle_secs: default_max_idle(),
        }
    }
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_idle() -> u64 {
    3600
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make background tasks spin.
    pub fn validate(&self) -> Result<()> {
        let reaper = &self.rate_limiting.reaper;
        if reaper.enabled && reaper.interval_secs == 0 {
            return Err(TurnstileError::Config(
                "reaper.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the configured rules, or `None` when no rules file is set.
    pub fn load_rules(&self) -> Result<Option<RuleSet>> {
        self.rate_limiting
            .rules_path
            .as_deref()
            .map(|path| RuleSet::from_file(path))
            .transpose()
    }

    /// Build a rate limiter from the configured rules.
    pub fn build_limiter(&self) -> Result<RateLimiter> {
        match self.load_rules()? {
            Some(rules) => RateLimiter::from_rules(&rules),
            None => Ok(RateLimiter::new()),
        }
    }
}
