//! HTTP forwarding adapter.

use crate::domain::error::ForwardError;
use crate::ports::outbound::Forwarder;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, Request},
    response::Response,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use reqwest::{redirect, Client, Url};
use std::time::Duration;
use tracing::debug;

/// Largest request body buffered for forwarding
pub const MAX_FORWARD_BODY: usize = 16 * 1024 * 1024;

/// Connection-scoped headers that must not cross the proxy
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards requests to backends with a shared connection pool.
///
/// Redirects are passed back to the caller untouched. The response body is
/// streamed, not buffered.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (shared pool, custom TLS)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, target: Url, req: Request<Body>) -> Result<Response, ForwardError> {
        let (parts, body) = req.into_parts();

        let body = read_body(body, MAX_FORWARD_BODY).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        debug!(method = %parts.method, target = %target, "Forwarding request");

        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Buffer a caller's body, failing once it grows past `limit`
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ForwardError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ForwardError::BodyTooLarge { limit }),
        Err(e) => Err(ForwardError::InvalidRequest(format!("request body: {e}"))),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
