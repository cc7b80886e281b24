use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::observability::latency::RuleSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub environment: &'static str,
}

#[derive(Serialize)]
pub struct LatencySummary {
    /// Thresholds are evaluated per instance; this is this instance's view.
    pub scope: &'static str,
    pub rules: Vec<RuleSnapshot>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        environment: state.environment.as_str(),
    })
}

pub async fn get_latency(State(state): State<AdminState>) -> Json<LatencySummary> {
    Json(LatencySummary {
        scope: "instance",
        rules: state.latency.snapshot(),
    })
}
