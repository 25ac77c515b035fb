//! CORS middleware.
//!
//! Any `OPTIONS` request is answered 204 with the configured headers and
//! never reaches the gateway; all other responses get the same headers.

use crate::domain::config::CorsConfig;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::Response,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

/// Allowed origins
#[derive(Debug, Clone)]
enum Origins {
    Any,
    List(Vec<HeaderValue>),
}

/// Header values precomputed from `CorsConfig`
#[derive(Debug)]
struct CorsHeaders {
    origins: Origins,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
    allow_credentials: bool,
}

impl CorsHeaders {
    fn from_config(config: &CorsConfig) -> Self {
        let origins = if config.allowed_origins.iter().any(|o| o == "*") {
            Origins::Any
        } else {
            Origins::List(
                config
                    .allowed_origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok())
                    .collect(),
            )
        };

        let methods: Vec<String> = config
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse::<Method>().ok())
            .map(|m| m.to_string())
            .collect();

        Self {
            origins,
            allow_methods: join(&methods),
            allow_headers: join(&config.allowed_headers),
            expose_headers: join(&config.expose_headers),
            max_age: HeaderValue::from(config.max_age),
            allow_credentials: config.allow_credentials,
        }
    }

    /// `Access-Control-Allow-Origin` for a request origin, if allowed
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match (&self.origins, origin) {
            // "*" is not valid alongside credentials; echo the caller instead
            (Origins::Any, Some(origin)) if self.allow_credentials => Some(origin.clone()),
            (Origins::Any, _) => Some(HeaderValue::from_static("*")),
            (Origins::List(list), Some(origin)) => list.contains(origin).then(|| origin.clone()),
            (Origins::List(_), None) => None,
        }
    }

    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(allow_origin) = self.allow_origin(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        }
        if matches!(self.origins, Origins::List(_)) || self.allow_credentials {
            headers.append(header::VARY, HeaderValue::from_static("origin"));
        }
        if let Some(methods) = &self.allow_methods {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        if let Some(allowed) = &self.allow_headers {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
        }
        if let Some(exposed) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone());
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

fn join(items: &[String]) -> Option<HeaderValue> {
    if items.is_empty() {
        return None;
    }
    HeaderValue::from_str(&items.join(", ")).ok()
}

/// CORS layer
#[derive(Clone)]
pub struct CorsLayer {
    headers: Arc<CorsHeaders>,
}

impl CorsLayer {
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            headers: Arc::new(CorsHeaders::from_config(config)),
        }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            headers: Arc::clone(&self.headers),
        }
    }
}

/// CORS service
#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    headers: Arc<CorsHeaders>,
}

impl<S> Service<Request<Body>> for CorsService<S>
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
        let cors = Arc::clone(&self.headers);
        let origin = req.headers().get(header::ORIGIN).cloned();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                debug!(path = %req.uri().path(), "Answering CORS preflight");
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::NO_CONTENT;
                cors.apply(origin.as_ref(), response.headers_mut());
                return Ok(response);
            }

            let mut response = inner.call(req).await?;
            cors.apply(origin.as_ref(), response.headers_mut());
            Ok(response)
        })
    }
}
