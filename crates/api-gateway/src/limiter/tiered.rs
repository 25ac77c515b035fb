//! Tiered fixed-window rate limiter.
//!
//! One counting window per caller key (`"ip:<addr>"`, `"api:<user>"`), sized
//! by the caller's tier. Check-and-increment runs under the DashMap shard
//! lock for that key, so concurrent requests for the same key can never be
//! over-admitted.

use crate::domain::config::RateLimitConfig;
use crate::domain::types::Tier;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Ceiling for the caller's tier
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Wait before a rejected caller may retry (zero when admitted)
    pub retry_after: Duration,
    /// Time until the current window resets
    pub reset_after: Duration,
}

/// Counting window for one caller key
#[derive(Debug)]
struct WindowEntry {
    tier: Tier,
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

/// Shared tiered limiter
pub struct TieredRateLimiter {
    config: RateLimitConfig,
    entries: DashMap<String, WindowEntry>,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TieredRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            entries: DashMap::new(),
            stopped: AtomicBool::new(false),
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Ceiling for a tier
    pub fn limit_for(&self, tier: Tier) -> u32 {
        self.config.limit_for(tier)
    }

    /// Admit or reject one request for `key` at `tier`
    pub fn allow(&self, key: &str, tier: Tier) -> RateLimitDecision {
        let limit = self.limit_for(tier);
        let window = self.config.window;

        if self.is_stopped() {
            warn!(key = %key, "Rate limiter stopped, rejecting request");
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after: window,
                reset_after: window,
            };
        }

        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                tier,
                window_start: now,
                count: 0,
                last_seen: now,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.tier != tier {
            debug!(key = %key, from = %entry.tier, to = %tier, "Caller tier changed");
            entry.tier = tier;
        }
        entry.last_seen = now;

        let reset_after = window.saturating_sub(now.duration_since(entry.window_start));

        if entry.count < limit {
            entry.count += 1;
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - entry.count,
                retry_after: Duration::ZERO,
                reset_after,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after: reset_after,
                reset_after,
            }
        }
    }

    /// Remove entries idle beyond the retention threshold whose window has
    /// also expired. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.retention;
        let window = self.config.window;
        let before = self.entries.len();

        self.entries.retain(|key, entry| {
            let idle = now.duration_since(entry.last_seen);
            let expired = now.duration_since(entry.window_start) >= window;
            if idle > retention && expired {
                debug!(key = %key, idle_secs = idle.as_secs(), "Removing idle rate limit entry");
                false
            } else {
                true
            }
        });

        before.saturating_sub(self.entries.len())
    }

    /// Start the periodic sweep. No-op if already running or stopped.
    ///
    /// The task holds only a weak reference, so dropping the last strong
    /// reference ends it as well.
    pub fn start_cleanup(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.is_stopped() {
            return;
        }

        let limiter = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.cleanup_interval;

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else { break };
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = limiter.entry_count(), "Rate limiter sweep");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Rate limiter sweep task exited");
        }));
    }

    /// Stop the sweep and release all entries. Idempotent.
    ///
    /// Admission checks after `stop` are rejected.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        // The task observes the signal and exits on its own
        drop(self.sweeper.lock().take());
        self.entries.clear();
        info!("Rate limiter stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the sweep task has been started and not yet stopped
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of tracked keys
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for TieredRateLimiter {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
