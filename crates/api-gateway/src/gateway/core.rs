//! Gateway core: route table and request dispatch.
//!
//! ```text
//! request ─► lookup ─► breaker ─► route limiter ─► forward ⟂ deadline ─► classify ─► stats
//!              │404       │503          │429                  │504/502
//! ```

use super::circuit_breaker::CircuitSnapshot;
use super::metrics::GatewayMetrics;
use super::route::{Outcome, RouteHandler, RouteStats};
use crate::domain::config::{CircuitBreakerConfig, RouteConfig};
use crate::domain::context::{self, X_REQUEST_ID};
use crate::domain::error::{ApiError, ForwardError, RouteError};
use crate::middleware::Handler;
use crate::ports::outbound::Forwarder;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tower::util::BoxCloneService;
use tracing::{debug, info, warn};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Default forwarding deadline when neither the route nor the gateway sets one
const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Registered route as reported by the admin API
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub path: String,
    pub target_url: String,
    pub timeout_ms: u64,
    pub rate_limit: u32,
    pub circuit_breaker: Option<CircuitSnapshot>,
}

/// The request gateway.
///
/// Owns the route table. Lookups take the read lock; registration takes the
/// write lock and swaps in a new `Arc<RouteHandler>`, so in-flight requests
/// finish against the handler they started with.
pub struct Gateway {
    routes: RwLock<HashMap<String, Arc<RouteHandler>>>,
    forwarder: Arc<dyn Forwarder>,
    breaker_config: CircuitBreakerConfig,
    default_timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            forwarder,
            breaker_config: CircuitBreakerConfig::default(),
            default_timeout: DEFAULT_ROUTE_TIMEOUT,
            metrics: Arc::new(GatewayMetrics::new()),
        }
    }

    /// Breaker settings for routes registered from now on
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Deadline for routes that don't set their own
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register (or replace) a route
    pub fn register_route(&self, config: RouteConfig) -> Result<(), RouteError> {
        let handler = RouteHandler::new(config, self.default_timeout, &self.breaker_config)?;
        let path = handler.path().to_string();

        info!(
            path = %path,
            target = %handler.target(),
            timeout_ms = handler.timeout().as_millis() as u64,
            rate_limit = handler.limiter().rate(),
            circuit_breaker = handler.breaker().is_some(),
            "Route registered"
        );

        if self.routes.write().insert(path.clone(), Arc::new(handler)).is_some() {
            info!(path = %path, "Replaced existing route");
        }
        Ok(())
    }

    /// Remove a route. Returns whether it existed.
    pub fn deregister_route(&self, path: &str) -> bool {
        let removed = self.routes.write().remove(path).is_some();
        if removed {
            info!(path = %path, "Route deregistered");
        }
        removed
    }

    /// Look up a route by exact path
    pub fn route(&self, path: &str) -> Option<Arc<RouteHandler>> {
        self.routes.read().get(path).cloned()
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut routes: Vec<RouteInfo> = self
            .routes
            .read()
            .values()
            .map(|handler| RouteInfo {
                path: handler.path().to_string(),
                target_url: handler.target().to_string(),
                timeout_ms: handler.timeout().as_millis() as u64,
                rate_limit: handler.limiter().rate(),
                circuit_breaker: handler.breaker().map(|b| b.snapshot()),
            })
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Snapshot of every route's stats
    pub fn get_stats(&self) -> HashMap<String, RouteStats> {
        self.routes
            .read()
            .iter()
            .map(|(path, handler)| (path.clone(), handler.stats()))
            .collect()
    }

    /// Force every breaker Closed. Returns the number reset.
    pub fn reset_circuits(&self) -> usize {
        let routes = self.routes.read();
        routes
            .values()
            .filter_map(|handler| handler.breaker())
            .inspect(|breaker| breaker.reset())
            .count()
    }

    /// Dispatch one request
    pub async fn handle(&self, mut req: Request<Body>) -> Response {
        let start = Instant::now();
        let path = req.uri().path().to_string();

        let Some(route) = self.route(&path) else {
            self.metrics.record_not_found();
            debug!(path = %path, "No route registered");
            return ApiError::route_not_found(&path).into_response();
        };

        if let Some(breaker) = route.breaker() {
            if !breaker.allow() {
                route.record_circuit_rejected();
                self.metrics.record_circuit_rejection();
                warn!(path = %path, state = %breaker.state(), "Circuit breaker open, rejecting request");
                return ApiError::service_unavailable(format!(
                    "Service unavailable: circuit open for {path}"
                ))
                .into_response();
            }
        }

        let client_ip = context::client_ip(&req);

        if let Err(wait) = route.limiter().check() {
            // Give back a probe slot the breaker may have just granted
            if let Some(breaker) = route.breaker() {
                breaker.record_ignored();
            }
            route.record_rate_limited();
            self.metrics.record_rate_limit_rejection();
            warn!(
                path = %path,
                client = %client_ip,
                retry_after_ms = wait.as_millis() as u64,
                "Route rate limit exceeded"
            );
            return ApiError::rate_limited(wait).into_response();
        }

        // Admitted: from here on the request is scored exactly once
        let admitted = Admitted {
            route: Arc::clone(&route),
            metrics: Arc::clone(&self.metrics),
            start,
            settled: false,
        };

        let request_id = context::request_id_or_new(&req);
        let user_id = context::identity(&req).map(|identity| identity.user_id.clone());
        set_outbound_headers(&mut req, &request_id, &client_ip, user_id.as_deref());

        let method = req.method().clone();
        let target = route.outbound_url(req.uri());
        let deadline = route.timeout();

        let (done_tx, done_rx) = oneshot::channel();
        let forwarder = Arc::clone(&self.forwarder);
        let metrics = Arc::clone(&self.metrics);
        metrics.forward_started();

        tokio::spawn(async move {
            let mut done_tx = done_tx;
            let result = tokio::select! {
                result = forwarder.forward(target, req) => Some(result),
                // Receiver dropped: the deadline fired or the caller went away
                _ = done_tx.closed() => None,
            };
            match result {
                Some(result) => {
                    let _ = done_tx.send(result);
                }
                None => debug!("Forward abandoned"),
            }
            metrics.forward_finished();
        });

        let result = match tokio::time::timeout(deadline, done_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ForwardError::Aborted),
            Err(_) => {
                self.metrics.record_timeout();
                admitted.settle(&Outcome::Timeout);
                warn!(
                    path = %path,
                    request_id = %request_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Backend request timed out"
                );
                return ApiError::timeout(deadline)
                    .with_retry_after(Duration::from_secs(1))
                    .into_response();
            }
        };

        let (outcome, response) = match result {
            Ok(response) => {
                let status = response.status();
                let outcome = if status.is_success() {
                    Outcome::Success
                } else if status.is_server_error() {
                    Outcome::Failure(format!("HTTP {}", status.as_u16()))
                } else {
                    Outcome::Unscored
                };
                (outcome, response)
            }
            Err(err) if err.is_backend_failure() => {
                self.metrics.record_bad_gateway();
                warn!(path = %path, request_id = %request_id, error = %err, "Backend unreachable");
                (
                    Outcome::Failure(err.to_string()),
                    ApiError::bad_gateway(format!("Backend unavailable for {path}")).into_response(),
                )
            }
            // The caller's request was at fault; the backend was never asked
            Err(ForwardError::BodyTooLarge { limit }) => {
                debug!(path = %path, request_id = %request_id, limit, "Request body too large");
                (Outcome::Unscored, ApiError::payload_too_large(limit).into_response())
            }
            Err(err) => {
                debug!(path = %path, request_id = %request_id, error = %err, "Request not forwardable");
                (Outcome::Unscored, ApiError::bad_request(err.to_string()).into_response())
            }
        };

        let latency = admitted.settle(&outcome);

        info!(
            path = %path,
            method = %method,
            status = response.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            request_id = %request_id,
            "Request processed"
        );

        response
    }

    /// The gateway as the terminal handler of a middleware chain
    pub fn into_handler(self: Arc<Self>) -> Handler {
        BoxCloneService::new(tower::service_fn(move |req: Request<Body>| {
            let gateway = Arc::clone(&self);
            async move { Ok::<_, Infallible>(gateway.handle(req).await) }
        }))
    }
}

/// An admitted request that has yet to be scored.
///
/// Dropping it unsettled means the dispatch future itself was dropped (an
/// outer deadline fired or the caller went away) while the backend had not
/// answered. That counts as a timeout, which also frees a half-open probe.
struct Admitted {
    route: Arc<RouteHandler>,
    metrics: Arc<GatewayMetrics>,
    start: Instant,
    settled: bool,
}

impl Admitted {
    fn settle(mut self, outcome: &Outcome) -> Duration {
        self.settled = true;
        self.record(outcome)
    }

    fn record(&self, outcome: &Outcome) -> Duration {
        let latency = self.start.elapsed();
        self.route.record_outcome(outcome, latency);
        self.metrics
            .record_request(*outcome == Outcome::Success, latency.as_millis() as u64);
        latency
    }
}

impl Drop for Admitted {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.metrics.record_timeout();
        let latency = self.record(&Outcome::Timeout);
        warn!(
            path = %self.route.path(),
            elapsed_ms = latency.as_millis() as u64,
            "Request dropped before the backend answered"
        );
    }
}

fn set_outbound_headers(
    req: &mut Request<Body>,
    request_id: &str,
    client_ip: &str,
    user_id: Option<&str>,
) {
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(client_ip) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }

    // Never pass a caller-supplied identity through
    headers.remove(&X_USER_ID);
    if let Some(value) = user_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        headers.insert(X_USER_ID.clone(), value);
    }
}
