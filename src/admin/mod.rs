//! Admin API: operator view of the governance layer.
//!
//! Served on its own listener and guarded by a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::{get_latency, get_status};
use crate::config::EnvironmentMode;
use crate::observability::latency::LatencyMonitor;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: String,
    pub environment: EnvironmentMode,
    pub latency: Arc<LatencyMonitor>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/latency", get(get_latency))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
