//! Route-local token bucket backed by `governor`.

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Burst allowance as a multiple of the per-second rate
const BURST_MULTIPLIER: u32 = 10;

/// Token bucket admitting `rate` requests per second with a burst of `10 × rate`
pub struct RouteLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
    rate: NonZeroU32,
    burst: NonZeroU32,
}

impl RouteLimiter {
    pub fn new(rate: NonZeroU32) -> Self {
        let burst = rate.saturating_mul(
            NonZeroU32::new(BURST_MULTIPLIER).unwrap_or(NonZeroU32::MIN),
        );
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            rate,
            burst,
        }
    }

    /// Take one token, or return how long until one is available
    pub fn check(&self) -> Result<(), Duration> {
        match self.limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => Err(not_until.wait_time_from(self.clock.now())),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl std::fmt::Debug for RouteLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}
