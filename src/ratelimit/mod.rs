//! Rate limiting logic and state management.

mod backend;
pub mod clock;
mod counter;
mod limiter;
pub mod pattern;
mod reaper;
mod rules;
mod status;

pub use backend::RateLimitService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::SlidingWindowLog;
pub use limiter::RateLimiter;
pub use pattern::{PatternResolver, DEFAULT_PATTERN};
pub use reaper::IdleReaper;
pub use rules::{LimitRegistry, RateLimitConfig, RuleEntry, RuleSet, DEFAULT_LIMITS};
pub use status::{RateLimitStatus, UNBOUNDED};
