//! Per-request scope: request ID and resolved caller identity.
//!
//! Both live in the request's extensions so downstream middleware and the
//! gateway core can read them without re-parsing headers.

use super::types::Tier;
use axum::extract::ConnectInfo;
use axum::http::{HeaderName, Request};
use std::net::SocketAddr;
use uuid::Uuid;

pub use tower_http::request_id::RequestId;

/// Request ID header, read on the way in and echoed on the way out
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Query parameter accepted as the lowest-precedence credential source.
/// Never forwarded to a backend.
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// Authenticated caller resolved by the authentication middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub api_key: String,
    pub user_id: String,
    pub tier: Tier,
}

/// Request ID in scope: the extension set by the request-id middleware,
/// otherwise the caller-supplied header.
pub fn request_id<B>(req: &Request<B>) -> Option<String> {
    if let Some(id) = req.extensions().get::<RequestId>() {
        if let Ok(value) = id.header_value().to_str() {
            return Some(value.to_string());
        }
    }
    req.headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Request ID in scope, or a fresh one
pub fn request_id_or_new<B>(req: &Request<B>) -> String {
    request_id(req).unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Identity resolved by authentication, if any
pub fn identity<B>(req: &Request<B>) -> Option<&Identity> {
    req.extensions().get::<Identity>()
}

/// Caller address: first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the transport peer (host only). `"unknown"` when none is available.
pub fn client_ip<B>(req: &Request<B>) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|list| list.split(',').map(str::trim).find(|ip| !ip.is_empty()))
    {
        return first.to_string();
    }

    if let Some(real_ip) = header("x-real-ip").filter(|ip| !ip.is_empty()) {
        return real_ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_prefers_extension() {
        let mut req = Request::builder()
            .header("x-request-id", "from-header")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(RequestId::new(HeaderValue::from_static("from-extension")));

        assert_eq!(request_id(&req).as_deref(), Some("from-extension"));
    }

    #[test]
    fn test_request_id_falls_back_to_header() {
        let req = Request::builder()
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_id(&req).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_request_id_or_new_generates_uuid() {
        let req = Request::new(Body::empty());
        assert!(request_id(&req).is_none());
        let id = request_id_or_new(&req);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_client_ip_forwarded_for_first_entry() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 172.16.0.1")
            .header("x-real-ip", "10.0.0.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.0.0.1");
    }

    #[test]
    fn test_client_ip_real_ip() {
        let req = Request::builder()
            .header("x-real-ip", "10.0.0.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "10.0.0.2");
    }

    #[test]
    fn test_client_ip_peer_address_strips_port() {
        let mut req = Request::new(Body::empty());
        req.extensions_mut()
            .insert(ConnectInfo("192.168.1.20:53211".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&req), "192.168.1.20");

        let bare = Request::new(Body::empty());
        assert_eq!(client_ip(&bare), "unknown");
    }

    #[test]
    fn test_identity_lookup() {
        let mut req = Request::new(Body::empty());
        assert!(identity(&req).is_none());

        req.extensions_mut().insert(Identity {
            api_key: "k".into(),
            user_id: "user-7".into(),
            tier: Tier::Paid,
        });
        assert_eq!(identity(&req).map(|i| i.tier), Some(Tier::Paid));
    }
}
