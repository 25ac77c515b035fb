//! The gateway core: route table, per-route breaker and limiter, and the
//! forward-with-deadline dispatch.

pub mod circuit_breaker;
pub mod core;
pub mod metrics;
pub mod route;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use core::{Gateway, RouteInfo};
pub use metrics::GatewayMetrics;
pub use route::{join_paths, Outcome, RouteHandler, RouteStats};
