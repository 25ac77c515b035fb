//! Request ID middleware.
//!
//! Keeps a caller-supplied `X-Request-ID`, otherwise generates a UUID. The ID
//! is stored in the request extensions (see [`crate::domain::context`]) and
//! echoed on the response.

use tower::Layer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestId, SetRequestId};

/// Request ID layer: `SetRequestId` outside `PropagateRequestId`
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = SetRequestId<PropagateRequestId<S>, MakeRequestUuid>;

    fn layer(&self, inner: S) -> Self::Service {
        SetRequestId::x_request_id(PropagateRequestId::x_request_id(inner), MakeRequestUuid)
    }
}
