//! Request observation middleware.
//!
//! `request_context_middleware` sits innermost and scopes the cache metrics
//! accumulator to the application handler. `latency_middleware` sits outermost:
//! it times the whole request, feeds the latency monitor and writes the access
//! log line with the cache counters the inner layer left on the response.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::request::request_id_of;
use crate::observability::latency::{LatencyMonitor, LatencyObservation};
use crate::observability::metrics;
use crate::observability::request_context::{self, CacheMetrics};

/// Run the rest of the request inside a fresh metrics context.
pub async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let (mut response, cache_metrics) = request_context::run_with_context(async move {
        let response = next.run(request).await;
        (response, request_context::snapshot())
    })
    .await;

    if let Some(cache_metrics) = cache_metrics {
        metrics::record_cache_metrics(&cache_metrics);
        response.extensions_mut().insert(cache_metrics);
    }
    response
}

/// Time the request, observe its latency and log it.
pub async fn latency_middleware(
    State(monitor): State<Arc<LatencyMonitor>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request_id_of(&request);

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    let duration_ms = elapsed.as_secs_f64() * 1000.0;

    monitor.observe(&LatencyObservation {
        method: method.as_str(),
        path: &path,
        duration_ms,
        status_code: status,
    });
    metrics::record_request(method.as_str(), status, elapsed);

    let cache_metrics = response
        .extensions()
        .get::<CacheMetrics>()
        .filter(|m| !m.is_empty())
        .and_then(|m| serde_json::to_string(m).ok());

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        duration_ms,
        cache_metrics = cache_metrics.as_deref(),
        "Request completed"
    );

    response
}
