//! Per-route circuit breaker.
//!
//! ```text
//!   Closed ──(failures ≥ max)──► Open ──(reset_timeout elapsed)──► HalfOpen
//!     ▲                           ▲                                  │
//!     │                           └────────(probe failed)────────────┤
//!     └──────────────────────────(probe succeeded)───────────────────┘
//! ```
//!
//! The whole check-and-transition in [`CircuitBreaker::allow`] runs under one
//! mutex, and HalfOpen admits a single probe at a time. The probe slot is
//! released when its outcome is recorded (success, failure or ignored). A
//! probe whose outcome never arrives is assumed lost after `reset_timeout`,
//! and the slot is granted again.

use crate::domain::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Testing if the backend recovered - one probe at a time
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    state_change_time: Instant,
    /// Set while a HalfOpen probe is outstanding
    probe_started: Option<Instant>,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub max_failures: u32,
    pub reset_timeout_ms: u64,
    pub time_in_state_ms: u64,
    pub last_failure_ms_ago: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            max_failures: config.max_failures.max(1),
            reset_timeout: config.reset_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                state_change_time: Instant::now(),
                probe_started: None,
            }),
        }
    }

    /// Whether a request may go through.
    ///
    /// Open → HalfOpen once `reset_timeout` has elapsed since the circuit
    /// opened; the caller that makes this transition holds the probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now.duration_since(inner.state_change_time) > self.reset_timeout {
                    info!(route = %self.name, "Circuit breaker transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.state_change_time = now;
                    inner.probe_started = Some(now);
                    true
                } else {
                    debug!(
                        route = %self.name,
                        remaining_ms = self
                            .reset_timeout
                            .saturating_sub(now.duration_since(inner.state_change_time))
                            .as_millis() as u64,
                        "Circuit breaker is open, rejecting request"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => match inner.probe_started {
                Some(started) if now.duration_since(started) <= self.reset_timeout => false,
                Some(_) => {
                    warn!(route = %self.name, "Half-open probe outcome never arrived, granting a new probe");
                    inner.probe_started = Some(now);
                    true
                }
                None => {
                    inner.probe_started = Some(now);
                    true
                }
            },
        }
    }

    /// Record a successful outcome: clears failures, closes the circuit
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.probe_started = None;

        if inner.state != CircuitState::Closed {
            info!(route = %self.name, from = %inner.state, "Circuit breaker closing after successful probe");
            inner.state = CircuitState::Closed;
            inner.state_change_time = Instant::now();
        }
    }

    /// Record a failed outcome; opens the circuit at `max_failures` or when
    /// a HalfOpen probe fails
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);
        inner.probe_started = None;

        let should_open =
            inner.failure_count >= self.max_failures || inner.state == CircuitState::HalfOpen;
        if !should_open {
            return;
        }

        match inner.state {
            CircuitState::Closed => warn!(
                route = %self.name,
                failures = inner.failure_count,
                threshold = self.max_failures,
                reset_timeout_secs = self.reset_timeout.as_secs(),
                "Circuit breaker opening due to failures"
            ),
            CircuitState::HalfOpen => {
                warn!(route = %self.name, "Circuit breaker reopening after probe failure")
            }
            CircuitState::Open => {}
        }
        inner.state = CircuitState::Open;
        inner.state_change_time = now;
    }

    /// Record an outcome that is scored neither way (e.g. a 4xx).
    /// Only releases a held probe slot.
    pub fn record_ignored(&self) {
        self.inner.lock().probe_started = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            max_failures: self.max_failures,
            reset_timeout_ms: self.reset_timeout.as_millis() as u64,
            time_in_state_ms: inner.state_change_time.elapsed().as_millis() as u64,
            last_failure_ms_ago: inner
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// Force the circuit Closed (admin)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(route = %self.name, from = %inner.state, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_started = None;
        inner.state_change_time = Instant::now();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
