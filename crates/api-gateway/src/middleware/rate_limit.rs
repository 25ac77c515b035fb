//! Tiered rate limiting middleware.
//!
//! Every response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (unix seconds at which the caller's window resets).
//! Rejections are 429 with `Retry-After`.

use crate::domain::context;
use crate::domain::error::ApiError;
use crate::domain::types::Tier;
use crate::limiter::{RateLimitDecision, TieredRateLimiter};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Maps a request to its limiter key and tier
pub trait KeySelector: Send + Sync {
    fn select(&self, req: &Request<Body>) -> (String, Tier);
}

impl<F> KeySelector for F
where
    F: Fn(&Request<Body>) -> (String, Tier) + Send + Sync,
{
    fn select(&self, req: &Request<Body>) -> (String, Tier) {
        self(req)
    }
}

/// `api:<user>` at the caller's tier when authenticated, otherwise
/// `ip:<client address>` at the anonymous tier
pub fn default_key_selector(req: &Request<Body>) -> (String, Tier) {
    match context::identity(req) {
        Some(identity) => (format!("api:{}", identity.user_id), identity.tier),
        None => (format!("ip:{}", context::client_ip(req)), Tier::Anonymous),
    }
}

/// Rate limit layer
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<TieredRateLimiter>,
    selector: Arc<dyn KeySelector>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<TieredRateLimiter>) -> Self {
        Self {
            limiter,
            selector: Arc::new(default_key_selector),
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn limiter(&self) -> Arc<TieredRateLimiter> {
        Arc::clone(&self.limiter)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            selector: Arc::clone(&self.selector),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<TieredRateLimiter>,
    selector: Arc<dyn KeySelector>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let limiter = Arc::clone(&self.limiter);
        let selector = Arc::clone(&self.selector);

        Box::pin(async move {
            let (key, tier) = selector.select(&req);
            let decision = limiter.allow(&key, tier);

            let mut response = if decision.allowed {
                inner.call(req).await?
            } else {
                warn!(
                    key = %key,
                    tier = %tier,
                    limit = decision.limit,
                    retry_after_ms = decision.retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                ApiError::rate_limited(decision.retry_after).into_response()
            };

            set_rate_limit_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset_at = chrono::Utc::now() + decision.reset_after;
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(reset_at.timestamp()),
    );
}
