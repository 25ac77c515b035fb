//! Middleware pipeline for the request gateway.
//!
//! Every middleware is a `tower::Layer` over the boxed [`Handler`] type, so
//! the pipeline can be assembled at runtime from configuration:
//!
//! ```text
//! Recovery → RequestId → AccessLog → Cors → SecurityHeaders → Timeout → Auth → RateLimit → Gateway
//! ```
//!
//! [`chain`] applies a list outer-to-inner: before-hooks run in list order,
//! after-hooks in reverse.

pub mod access_log;
pub mod auth;
pub mod cors;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod security_headers;
pub mod timeout;

pub use access_log::AccessLogLayer;
pub use auth::{extract_api_key, AuthLayer};
pub use cors::CorsLayer;
pub use rate_limit::{default_key_selector, KeySelector, RateLimitLayer};
pub use recovery::RecoveryLayer;
pub use request_id::RequestIdLayer;
pub use security_headers::SecurityHeadersLayer;
pub use timeout::TimeoutLayer;

use crate::domain::config::GatewayConfig;
use crate::limiter::TieredRateLimiter;
use crate::ports::outbound::ApiKeyValidator;
use axum::{body::Body, http::Request, response::Response};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower::{Layer, Service};

/// A request handler: the terminal gateway or a middleware-wrapped one
pub type Handler = BoxCloneService<Request<Body>, Response, Infallible>;

/// Wraps a handler in another handler
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Handler) -> Handler;
}

impl<L> Middleware for L
where
    L: Layer<Handler> + Send + Sync,
    L::Service: Service<Request<Body>, Response = Response, Error = Infallible>
        + Clone
        + Send
        + 'static,
    <L::Service as Service<Request<Body>>>::Future: Send + 'static,
{
    fn wrap(&self, next: Handler) -> Handler {
        BoxCloneService::new(self.layer(next))
    }
}

/// Build a handler from an async function
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<Body>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    BoxCloneService::new(tower::service_fn(move |req: Request<Body>| {
        let response = f(req);
        async move { Ok::<_, Infallible>(response.await) }
    }))
}

/// Compose `middlewares` around `handler`; the first entry is outermost
pub fn chain(handler: Handler, middlewares: &[Arc<dyn Middleware>]) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}

/// The gateway's standard pipeline, assembled from configuration
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn from_config(
        config: &GatewayConfig,
        limiter: Arc<TieredRateLimiter>,
        validator: Arc<dyn ApiKeyValidator>,
    ) -> Self {
        let mut layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryLayer::new()),
            Arc::new(RequestIdLayer::new()),
            Arc::new(AccessLogLayer::new()),
        ];
        if config.cors.enabled {
            layers.push(Arc::new(CorsLayer::new(&config.cors)));
        }
        layers.push(Arc::new(SecurityHeadersLayer::new()));
        layers.push(Arc::new(TimeoutLayer::new(config.timeouts.request)));
        layers.push(Arc::new(AuthLayer::new(validator, config.auth.require_auth)));
        if config.rate_limit.enabled {
            layers.push(Arc::new(RateLimitLayer::new(limiter)));
        }

        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap the terminal handler
    pub fn apply(&self, handler: Handler) -> Handler {
        chain(handler, &self.layers)
    }
}
