//! Key to pattern resolution.
//!
//! Callers build keys as `pattern:identifier` (for example
//! `user:login:alice@example.com`). The resolver maps such a key back to the
//! pattern whose rule governs it, falling back to [`DEFAULT_PATTERN`].

/// Catch-all pattern for keys that match no known prefix.
pub const DEFAULT_PATTERN: &str = "default";

pub const USER_REGISTER: &str = "user:register";
pub const USER_LOGIN: &str = "user:login";
pub const USER_READ: &str = "user:read";
pub const USER_UPDATE: &str = "user:update";
pub const USER_PREFERENCES_READ: &str = "user:preferences:read";
pub const USER_PREFERENCES_UPDATE: &str = "user:preferences:update";

/// Patterns known to every resolver.
pub const BUILTIN_PATTERNS: [&str; 6] = [
    USER_REGISTER,
    USER_LOGIN,
    USER_READ,
    USER_UPDATE,
    USER_PREFERENCES_READ,
    USER_PREFERENCES_UPDATE,
];

/// Maps keys to patterns with a longest-prefix-first table.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    /// (prefix, pattern) pairs, longest prefix first
    table: Vec<(String, String)>,
}

impl PatternResolver {
    /// Create a resolver over the built-in patterns.
    pub fn new() -> Self {
        Self::with_patterns(std::iter::empty::<String>())
    }

    /// Create a resolver over the built-in patterns plus `extra`.
    ///
    /// Each extra pattern acts as its own prefix. `default` is never added to
    /// the table since it is the fallback.
    pub fn with_patterns<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table: Vec<(String, String)> = BUILTIN_PATTERNS
            .iter()
            .map(|p| (p.to_string(), p.to_string()))
            .collect();

        for pattern in extra {
            let pattern = pattern.into();
            if pattern.is_empty()
                || pattern == DEFAULT_PATTERN
                || table.iter().any(|(prefix, _)| *prefix == pattern)
            {
                continue;
            }
            table.push((pattern.clone(), pattern));
        }

        // Stable sort keeps declaration order among equal lengths.
        table.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self { table }
    }

    /// Resolve a key to its pattern.
    pub fn resolve<'a>(&'a self, key: &str) -> &'a str {
        self.table
            .iter()
            .find(|(prefix, _)| matches_prefix(key, prefix))
            .map(|(_, pattern)| pattern.as_str())
            .unwrap_or(DEFAULT_PATTERN)
    }

    /// Patterns in match order.
    #[cfg(test)]
    fn patterns(&self) -> impl Iterator<Item = &str> {
        self.table.iter().map(|(_, pattern)| pattern.as_str())
    }
}

impl Default for PatternResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix match on `:`-separated segments.
fn matches_prefix(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(':'),
        None => false,
    }
}
