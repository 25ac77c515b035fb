//! # Request Gateway Test Suite
//!
//! End-to-end flows: real axum backends on loopback ports, the gateway's
//! public and admin servers in front of them, and a reqwest client.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs      # Backend + gateway harness
//!     ├── proxy_flows.rs  # Routing, header propagation, admin API
//!     ├── resilience.rs   # Circuit breaker, deadlines, dead backends
//!     └── admission.rs    # Authentication and tiered rate limits
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p gateway-tests
//! cargo test -p gateway-tests integration::resilience::
//! ```

pub mod integration;
