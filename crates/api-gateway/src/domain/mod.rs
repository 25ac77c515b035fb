//! Domain types for the request gateway.
//!
//! Core types, configuration, request scope and error handling.

pub mod config;
pub mod context;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::{
    CircuitBreakerConfig, ConfigError, CorsConfig, GatewayConfig, RateLimitConfig, RouteConfig,
};
pub use context::{Identity, RequestId};
pub use error::{ApiError, AuthError, ForwardError, GatewayError, RouteError};
pub use types::*;
