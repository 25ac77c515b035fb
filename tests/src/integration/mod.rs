//! Cross-component flows through a running gateway.

pub mod support;

mod admission;
mod proxy_flows;
mod resilience;
