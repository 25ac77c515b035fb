//! Gateway error types and the JSON error envelope returned to callers.
//!
//! Every rejection the gateway produces itself (auth, admission, timeouts,
//! recovered faults) uses the same body:
//!
//! ```json
//! {"success": false, "error": {"code": "RATE_LIMIT_EXCEEDED", "message": "..."}, "timestamp": "..."}
//! ```

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Machine-readable error codes carried in the envelope
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_API_KEY: &str = "INVALID_API_KEY";
    pub const API_KEY_INACTIVE: &str = "API_KEY_INACTIVE";
    pub const API_KEY_EXPIRED: &str = "API_KEY_EXPIRED";
    pub const ROUTE_NOT_FOUND: &str = "ROUTE_NOT_FOUND";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    pub const BAD_GATEWAY: &str = "BAD_GATEWAY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Caller-facing error: HTTP status plus envelope code and message
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Seconds the caller should wait before retrying (sets `Retry-After`)
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a `Retry-After` hint, rounded up to whole seconds (minimum 1)
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(retry_after_secs(wait));
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, message)
    }

    pub fn invalid_api_key() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::INVALID_API_KEY,
            "Invalid or expired API key",
        )
    }

    pub fn api_key_inactive() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::API_KEY_INACTIVE,
            "API key is inactive",
        )
    }

    pub fn api_key_expired() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::API_KEY_EXPIRED,
            "API key has expired",
        )
    }

    pub fn route_not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::ROUTE_NOT_FOUND,
            format!("No route registered for {path}"),
        )
    }

    pub fn rate_limited(wait: Duration) -> Self {
        let secs = retry_after_secs(wait);
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMIT_EXCEEDED,
            format!("Rate limit exceeded. Try again in {secs} seconds."),
        )
        .with_retry_after(wait)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::SERVICE_UNAVAILABLE,
            message,
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {limit} bytes"),
        )
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, codes::BAD_GATEWAY, message)
    }

    pub fn timeout(deadline: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            codes::TIMEOUT,
            format!("Request exceeded {}ms deadline", deadline.as_millis()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL_ERROR,
            message,
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.status.as_u16(), self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorDetail<'a>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            error: ErrorDetail {
                code: self.code,
                message: &self.message,
            },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let mut response = Response::new(Body::from(
            serde_json::to_vec(&envelope).unwrap_or_default(),
        ));
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Round a wait time up to whole seconds, never below 1
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Route registration errors. Raised at registration, never per request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Target URL could not be parsed or is not an http(s) URL
    #[error("invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },
    /// Route rate limit must be positive
    #[error("invalid rate limit for route '{0}': must be greater than 0")]
    InvalidRateLimit(String),
    /// Route timeout must be positive
    #[error("invalid timeout for route '{0}': must be greater than 0")]
    InvalidTimeout(String),
    /// Route path must start with '/'
    #[error("invalid route path '{0}': must start with '/'")]
    InvalidPath(String),
}

/// Failure to obtain a response from a backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// Connection, TLS or protocol failure talking to the backend
    #[error("backend transport error: {0}")]
    Transport(String),
    /// The caller's request could not be read or forwarded as sent
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
    /// The caller's body is over the forwarding limit
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    /// The forwarding task ended without reporting a result
    #[error("forwarding task aborted")]
    Aborted,
}

impl ForwardError {
    /// Whether the backend is to blame. Caller-side errors never reach it.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Aborted)
    }
}

/// API key validation failures. Always surfaced as 401.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown API key")]
    UnknownKey,
    #[error("identity store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Service-level errors (startup, binding, configuration)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Route registration error
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Server terminated with an I/O error
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}
