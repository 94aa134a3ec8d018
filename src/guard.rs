//! Rate limit checks for user-management operations.
//!
//! Each operation builds its key as `pattern:identifier` and asks the rate
//! limit service for admission. A deny becomes a
//! [`TurnstileError::RateLimitExceeded`] at this layer.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::pattern::{
    USER_LOGIN, USER_PREFERENCES_READ, USER_PREFERENCES_UPDATE, USER_READ, USER_REGISTER,
    USER_UPDATE,
};
use crate::ratelimit::RateLimitService;

/// A rate limited user-management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Login,
    ReadUser,
    UpdateUser,
    ReadPreferences,
    UpdatePreferences,
}

impl Operation {
    /// The pattern whose rule governs this operation.
    pub fn pattern(&self) -> &'static str {
        match self {
            Operation::Register => USER_REGISTER,
            Operation::Login => USER_LOGIN,
            Operation::ReadUser => USER_READ,
            Operation::UpdateUser => USER_UPDATE,
            Operation::ReadPreferences => USER_PREFERENCES_READ,
            Operation::UpdatePreferences => USER_PREFERENCES_UPDATE,
        }
    }

    /// Build the rate limit key for `identifier` (an email or user ID).
    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.pattern(), identifier)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Register => "registration",
            Operation::Login => "login",
            Operation::ReadUser => "user read",
            Operation::UpdateUser => "user update",
            Operation::ReadPreferences => "preferences read",
            Operation::UpdatePreferences => "preferences update",
        };
        f.write_str(name)
    }
}

/// Admission check in front of user-management operations.
pub struct RateLimitGuard<S: RateLimitService + ?Sized> {
    service: Arc<S>,
}

impl<S: RateLimitService + ?Sized> Clone for RateLimitGuard<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: RateLimitService + ?Sized> RateLimitGuard<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Admit `operation` for `identifier` or fail with `RateLimitExceeded`.
    pub async fn check(&self, operation: Operation, identifier: &str) -> Result<()> {
        let key = operation.key(identifier);
        if self.service.allow(&key).await? {
            return Ok(());
        }

        let retry_after = match self.service.get_status(&key).await {
            Ok(status) => status.retry_after,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read rate limit status");
                Default::default()
            }
        };

        info!(key = %key, operation = %operation, "Rate limit exceeded");
        Err(TurnstileError::RateLimitExceeded {
            operation: operation.to_string(),
            retry_after,
        })
    }

    /// Clear the quota for `operation` and `identifier`, e.g. after a
    /// successful login.
    pub async fn reset(&self, operation: Operation, identifier: &str) -> Result<()> {
        self.service.reset(&operation.key(identifier)).await
    }
}
