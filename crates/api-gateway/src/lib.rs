//! Request gateway: routing, admission control and authentication in front
//! of a set of backend services.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          REQUEST GATEWAY                              │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐                                 ┌─────────────┐      │
//! │  │    HTTP     │                                 │    Admin    │      │
//! │  │  Port 8080  │                                 │  Port 8081  │      │
//! │  └──────┬──────┘                                 └──────┬──────┘      │
//! │         │                                               │             │
//! │  ┌──────┴──────────────────────────────────────┐        │             │
//! │  │              Middleware Stack               │        │             │
//! │  │ Recovery → RequestId → AccessLog → Cors →   │        │             │
//! │  │ SecurityHeaders → Timeout → Auth → RateLimit│        │             │
//! │  └──────┬──────────────────────────────────────┘        │             │
//! │         │                                               │             │
//! │  ┌──────┴──────────────────────────────────────┐        │             │
//! │  │                Gateway Core                 │◄───────┘             │
//! │  │ route table → breaker → limiter → forward   │  stats / routes      │
//! │  └──────┬──────────────────────────────────────┘                      │
//! └─────────┼─────────────────────────────────────────────────────────────┘
//!           ▼
//!    backend services
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use api_gateway::{ApiGatewayService, GatewayConfig};
//!
//! let service = ApiGatewayService::new(GatewayConfig::default())?;
//! service.start().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod gateway;
pub mod limiter;
pub mod middleware;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use adapters::{HttpForwarder, StaticKeyValidator};
pub use domain::config::{GatewayConfig, RouteConfig};
pub use domain::error::{ApiError, GatewayError, RouteError};
pub use domain::types::*;
pub use gateway::{CircuitBreaker, CircuitState, Gateway, GatewayMetrics, RouteStats};
pub use limiter::TieredRateLimiter;
pub use middleware::{chain, Handler, Middleware, MiddlewareStack};
pub use ports::{ApiKeyValidator, Forwarder};
pub use service::ApiGatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
