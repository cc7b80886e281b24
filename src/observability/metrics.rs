//! Metrics collection and exposition.
//!
//! # Metrics
//! - `governance_requests_total` (counter): requests by method, status
//! - `governance_request_duration_seconds` (histogram): latency by method
//! - `governance_rate_limited_total` (counter): 429s by policy
//! - `governance_rate_limit_store_failures_total` (counter): fail-open decisions by policy
//! - `governance_origin_denied_total` (counter): rejected browser origins
//! - `governance_latency_alerts_total` (counter): p95 alerts by rule
//! - `governance_cache_lookups_total` (counter): request-scoped cache hits/misses

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::observability::request_context::CacheMetrics;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "governance_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("governance_request_duration_seconds", "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_rate_limited(policy: &str) {
    counter!("governance_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_rate_limit_store_failure(policy: &str) {
    counter!("governance_rate_limit_store_failures_total", "policy" => policy.to_string())
        .increment(1);
}

pub fn record_origin_denied() {
    counter!("governance_origin_denied_total").increment(1);
}

pub fn record_latency_alert(rule: &str) {
    counter!("governance_latency_alerts_total", "rule" => rule.to_string()).increment(1);
}

/// Fold one request's cache counters into the process-wide totals.
pub fn record_cache_metrics(cache_metrics: &CacheMetrics) {
    for (cache, counts) in cache_metrics.iter() {
        if counts.hits > 0 {
            counter!(
                "governance_cache_lookups_total",
                "cache" => cache.to_string(),
                "result" => "hit"
            )
            .increment(counts.hits);
        }
        if counts.misses > 0 {
            counter!(
                "governance_cache_lookups_total",
                "cache" => cache.to_string(),
                "result" => "miss"
            )
            .increment(counts.misses);
        }
    }
}
