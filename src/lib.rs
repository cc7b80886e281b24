//! Request governance layer.
//!
//! Sits in front of every inbound HTTP request and decides whether the request's
//! origin is trusted, whether it must be throttled under a shared rate budget, and
//! whether per-route latency has silently regressed.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GovernanceConfig;
pub use http::{Governance, GovernanceServer};
pub use lifecycle::Shutdown;
