//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, governance layers)
//!     → request.rs (request ID)
//!     → middleware/ (latency observation, request-scoped metrics)
//!     → response.rs (structured rejections)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{Governance, GovernanceServer};
