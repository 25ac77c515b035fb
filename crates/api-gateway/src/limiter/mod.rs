//! Admission control.
//!
//! - [`TieredRateLimiter`]: shared, keyed fixed-window counter with per-tier
//!   ceilings and a background sweep of idle keys.
//! - [`RouteLimiter`]: route-local token bucket (rate per second, burst of ten
//!   times the rate).

pub mod tiered;
pub mod token_bucket;

pub use tiered::{RateLimitDecision, TieredRateLimiter};
pub use token_bucket::RouteLimiter;
