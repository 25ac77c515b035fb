//! Ports: the collaborators the gateway consumes but does not own.

pub mod outbound;

pub use outbound::{ApiKeyValidator, Forwarder};
