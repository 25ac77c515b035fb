//! Adapters for the gateway's outbound ports.
//!
//! - [`HttpForwarder`]: forwards requests to backends over HTTP(S) with reqwest.
//! - [`StaticKeyValidator`]: resolves API keys from the configured key list.

pub mod http_forwarder;
pub mod static_keys;

pub use http_forwarder::HttpForwarder;
pub use static_keys::{constant_time_compare, StaticKeyValidator};
