//! Route handler records and per-route stats.

use super::circuit_breaker::CircuitBreaker;
use crate::domain::config::{CircuitBreakerConfig, RouteConfig};
use crate::domain::context::API_KEY_QUERY_PARAM;
use crate::domain::error::RouteError;
use crate::limiter::RouteLimiter;
use axum::http::Uri;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Serialize, Serializer};
use std::num::NonZeroU32;
use std::time::Duration;
use url::form_urlencoded;

/// Accumulated counters for one route
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteStats {
    /// Requests forwarded to the backend (admitted by breaker and limiter)
    pub requests: u64,
    pub success: u64,
    pub failures: u64,
    /// Subset of `failures` that hit the route deadline
    pub timeouts: u64,
    pub rate_limited: u64,
    pub circuit_rejected: u64,
    #[serde(rename = "total_latency_ms", serialize_with = "serialize_millis")]
    pub total_latency: Duration,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl RouteStats {
    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.requests) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
            Err(_) => Duration::from_secs_f64(
                self.total_latency.as_secs_f64() / self.requests as f64,
            ),
        }
    }

    fn record_error(&mut self, latency: Duration, reason: String) {
        self.requests += 1;
        self.failures += 1;
        self.total_latency += latency;
        self.last_error = Some(reason);
        self.last_error_time = Some(Utc::now());
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Classified result of one forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx from the backend
    Success,
    /// 5xx from the backend or a transport error
    Failure(String),
    /// Route deadline elapsed first
    Timeout,
    /// Any other status; not scored against the breaker
    Unscored,
}

/// A registered route with its limiter, breaker and stats.
///
/// Immutable after construction apart from the stats and breaker, each
/// behind its own lock.
pub struct RouteHandler {
    route: RouteConfig,
    timeout: Duration,
    target: Url,
    limiter: RouteLimiter,
    breaker: Option<CircuitBreaker>,
    stats: Mutex<RouteStats>,
}

impl RouteHandler {
    /// Validate a route and build its handler
    pub fn new(
        route: RouteConfig,
        default_timeout: Duration,
        breaker_config: &CircuitBreakerConfig,
    ) -> Result<Self, RouteError> {
        if !route.path.starts_with('/') {
            return Err(RouteError::InvalidPath(route.path));
        }

        let target = parse_target(&route.target_url)?;

        let rate = NonZeroU32::new(route.rate_limit)
            .ok_or_else(|| RouteError::InvalidRateLimit(route.path.clone()))?;

        let timeout = route.timeout.unwrap_or(default_timeout);
        if timeout.is_zero() {
            return Err(RouteError::InvalidTimeout(route.path.clone()));
        }

        let breaker = route
            .circuit_breaker_enabled
            .then(|| CircuitBreaker::new(route.path.clone(), breaker_config));

        Ok(Self {
            timeout,
            target,
            limiter: RouteLimiter::new(rate),
            breaker,
            stats: Mutex::new(RouteStats::default()),
            route,
        })
    }

    pub fn path(&self) -> &str {
        &self.route.path
    }

    pub fn config(&self) -> &RouteConfig {
        &self.route
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Effective forwarding deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn limiter(&self) -> &RouteLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Backend URL for an inbound request: target path joined to the
    /// inbound path with one slash, queries merged target-first. A caller's
    /// `api_key` query credential is dropped.
    pub fn outbound_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(&join_paths(self.target.path(), uri.path()));

        let inbound = uri.query().map(without_credential);
        let query = match (self.target.query(), inbound.as_deref()) {
            (Some(t), Some(r)) if !t.is_empty() && !r.is_empty() => Some(format!("{t}&{r}")),
            (Some(t), _) if !t.is_empty() => Some(t.to_string()),
            (_, Some(r)) if !r.is_empty() => Some(r.to_string()),
            _ => None,
        };
        url.set_query(query.as_deref());
        url
    }

    /// Snapshot of the route's stats
    pub fn stats(&self) -> RouteStats {
        self.stats.lock().clone()
    }

    pub fn record_rate_limited(&self) {
        self.stats.lock().rate_limited += 1;
    }

    pub fn record_circuit_rejected(&self) {
        self.stats.lock().circuit_rejected += 1;
    }

    /// Fold a forward outcome into the stats and the breaker
    pub fn record_outcome(&self, outcome: &Outcome, latency: Duration) {
        {
            let mut stats = self.stats.lock();
            match outcome {
                Outcome::Success => {
                    stats.requests += 1;
                    stats.success += 1;
                    stats.total_latency += latency;
                }
                Outcome::Failure(reason) => stats.record_error(latency, reason.clone()),
                Outcome::Timeout => {
                    stats.timeouts += 1;
                    stats.record_error(latency, "timeout".to_string());
                }
                Outcome::Unscored => {
                    stats.requests += 1;
                    stats.total_latency += latency;
                }
            }
        }

        if let Some(breaker) = &self.breaker {
            match outcome {
                Outcome::Success => breaker.record_success(),
                Outcome::Failure(_) | Outcome::Timeout => breaker.record_failure(),
                Outcome::Unscored => breaker.record_ignored(),
            }
        }
    }
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandler")
            .field("path", &self.route.path)
            .field("target", &self.target.as_str())
            .field("timeout", &self.timeout)
            .field("breaker", &self.breaker)
            .finish()
    }
}

fn parse_target(raw: &str) -> Result<Url, RouteError> {
    let invalid = |reason: String| RouteError::InvalidTarget {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Inbound query minus the credential parameter. Untouched unless the
/// parameter is present.
fn without_credential(query: &str) -> String {
    let mut pairs = form_urlencoded::parse(query.as_bytes());
    if !pairs.any(|(name, _)| name == API_KEY_QUERY_PARAM) {
        return query.to_string();
    }
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(
            form_urlencoded::parse(query.as_bytes())
                .filter(|(name, _)| name != API_KEY_QUERY_PARAM),
        )
        .finish()
}

/// Join two URL paths with exactly one slash between them
pub fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
