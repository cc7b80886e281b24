//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → request_context.rs (task-local cache hit/miss accumulator)
//!     → latency.rs (per-route p95 over a global window, one-shot alerts)
//!     → metrics.rs (counters, histograms)
//!     → logging.rs (structured log events)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Alert sink (in-process callback)
//! ```
//!
//! # Design Decisions
//! - Latency state is process-local; thresholds are evaluated per instance
//! - `observe` is synchronous and infallible; it never awaits
//! - Request-scoped state is implicit (task-local), never a global

pub mod latency;
pub mod logging;
pub mod metrics;
pub mod request_context;

pub use latency::{
    log_alert, AlertSink, Clock, LatencyAlert, LatencyDetector, LatencyMonitor, LatencyObservation,
    LatencyRule, ManualClock, MonotonicClock,
};
pub use request_context::{CacheCounts, CacheMetrics};
