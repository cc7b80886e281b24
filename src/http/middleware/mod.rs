//! Governance middleware not owned by the security subsystem.

pub mod observe;

pub use observe::{latency_middleware, request_context_middleware};
