//! Outbound ports for the request gateway.

use crate::domain::error::{AuthError, ForwardError};
use crate::domain::types::ApiKeyInfo;
use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use reqwest::Url;

/// Sends a request to a backend and returns its response.
///
/// The gateway races this call against the route deadline and drops the
/// future if the deadline wins, so implementations must be cancel-safe.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// `target` is the fully resolved outbound URL (path and query joined)
    async fn forward(&self, target: Url, req: Request<Body>) -> Result<Response, ForwardError>;
}

/// Resolves an API key to its record in the identity store
#[async_trait]
pub trait ApiKeyValidator: Send + Sync {
    async fn validate(&self, key: &str) -> Result<ApiKeyInfo, AuthError>;
}
