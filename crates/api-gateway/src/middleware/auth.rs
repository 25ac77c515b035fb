//! Authentication middleware.
//!
//! Credential precedence: `Authorization: Bearer <key>`, then `X-API-Key`,
//! then the `api_key` query parameter. A present credential is always
//! validated, even when authentication is optional. On success the caller's
//! [`Identity`] is stored in the request extensions.

use crate::domain::context::{Identity, API_KEY_QUERY_PARAM};
use crate::domain::error::ApiError;
use crate::ports::outbound::ApiKeyValidator;
use axum::{
    body::Body,
    http::{header, Request},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};
use url::form_urlencoded;

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<dyn ApiKeyValidator>,
    require_auth: bool,
}

impl AuthLayer {
    pub fn new(validator: Arc<dyn ApiKeyValidator>, require_auth: bool) -> Self {
        Self {
            validator,
            require_auth,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: Arc::clone(&self.validator),
            require_auth: self.require_auth,
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<dyn ApiKeyValidator>,
    require_auth: bool,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let validator = Arc::clone(&self.validator);
        let require_auth = self.require_auth;

        Box::pin(async move {
            let path = req.uri().path().to_string();

            let Some(key) = extract_api_key(&req) else {
                if require_auth {
                    debug!(path = %path, "Missing API key");
                    return Ok(ApiError::unauthorized("API key required").into_response());
                }
                return inner.call(req).await;
            };

            let info = match validator.validate(&key).await {
                Ok(info) => info,
                Err(err) => {
                    warn!(path = %path, error = %err, "API key rejected");
                    return Ok(ApiError::invalid_api_key().into_response());
                }
            };

            if !info.active {
                warn!(path = %path, user_id = %info.user_id, "Inactive API key");
                return Ok(ApiError::api_key_inactive().into_response());
            }
            if info.is_expired_at(Utc::now()) {
                warn!(path = %path, user_id = %info.user_id, "Expired API key");
                return Ok(ApiError::api_key_expired().into_response());
            }

            debug!(path = %path, user_id = %info.user_id, tier = %info.tier, "Authenticated");
            req.extensions_mut().insert(Identity {
                api_key: key,
                user_id: info.user_id,
                tier: info.tier,
            });

            inner.call(req).await
        })
    }
}

/// Credential carried by a request, by precedence
pub fn extract_api_key<B>(req: &Request<B>) -> Option<String> {
    let headers = req.headers();

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let header_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    bearer
        .filter(|k| !k.is_empty())
        .or(header_key.filter(|k| !k.is_empty()))
        .map(str::to_string)
        .or_else(|| query_api_key(req.uri().query()?))
}

fn query_api_key(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == API_KEY_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|key| !key.is_empty())
}
