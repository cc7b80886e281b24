//! Latency regression detection.
//!
//! Every rule keeps the durations observed in the current window. When a rule has
//! at least `min_samples` samples and their 95th percentile reaches the rule's
//! threshold, one alert is raised; the rule stays silent until the window resets.
//!
//! The window is global: all rules of a detector share one clock and are reset
//! together by the first observation arriving after `window_ms` has elapsed.
//! State is process-local, so with several instances each one evaluates its own
//! traffic only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::http::Method;
use regex::Regex;
use serde::Serialize;

use crate::config::validation::parse_method;
use crate::config::LatencyConfig;
use crate::observability::metrics;

/// Default window length.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Millisecond clock used to drive windows.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock measured from its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A watched route.
#[derive(Debug, Clone)]
pub struct LatencyRule {
    pub id: String,
    pub method: Method,
    pub path_pattern: Regex,
    pub p95_threshold_ms: u64,
    pub min_samples: usize,
}

impl LatencyRule {
    pub fn new(
        id: impl Into<String>,
        method: Method,
        path_pattern: &str,
        p95_threshold_ms: u64,
        min_samples: usize,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id: id.into(),
            method,
            path_pattern: Regex::new(path_pattern)?,
            p95_threshold_ms,
            min_samples,
        })
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        self.method.as_str().eq_ignore_ascii_case(method) && self.path_pattern.is_match(path)
    }
}

/// One completed request.
#[derive(Debug, Clone, Copy)]
pub struct LatencyObservation<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub duration_ms: f64,
    pub status_code: u16,
}

/// Payload handed to the alert callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyAlert {
    pub id: String,
    pub method: String,
    /// Path of the observation that triggered the alert.
    pub path: String,
    pub p95_ms: u64,
    pub threshold_ms: u64,
    pub sample_count: usize,
    pub status_code: u16,
}

/// Alert callback.
pub type AlertSink = Arc<dyn Fn(&LatencyAlert) + Send + Sync>;

/// Default sink: structured warning plus a counter.
pub fn log_alert(alert: &LatencyAlert) {
    tracing::warn!(
        rule = %alert.id,
        method = %alert.method,
        path = %alert.path,
        p95_ms = alert.p95_ms,
        threshold_ms = alert.threshold_ms,
        sample_count = alert.sample_count,
        status_code = alert.status_code,
        "Latency regression detected"
    );
    metrics::record_latency_alert(&alert.id);
}

/// 95th percentile by nearest rank: `sorted[max(0, ceil(n * 0.95) - 1)]`.
pub fn p95(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (sorted.len() as f64 * 0.95).ceil() as usize;
    Some(sorted[rank.saturating_sub(1)])
}

#[derive(Debug, Default, Clone)]
struct RouteWindow {
    samples: Vec<f64>,
    alerted: bool,
}

#[derive(Debug)]
struct WindowState {
    started_at_ms: u64,
    /// Indexed like `LatencyDetector::rules`.
    routes: Vec<RouteWindow>,
}

/// Current window of one rule, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSnapshot {
    pub id: String,
    pub window_ms: u64,
    pub window_age_ms: u64,
    pub samples: usize,
    pub p95_ms: Option<u64>,
    pub alerted: bool,
}

/// Detector for a set of rules sharing one window.
pub struct LatencyDetector {
    rules: Vec<LatencyRule>,
    window_ms: u64,
    on_alert: AlertSink,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl LatencyDetector {
    pub fn new(rules: Vec<LatencyRule>, window_ms: u64, on_alert: AlertSink, clock: Arc<dyn Clock>) -> Self {
        let state = WindowState {
            started_at_ms: clock.now_ms(),
            routes: vec![RouteWindow::default(); rules.len()],
        };
        Self {
            rules,
            window_ms,
            on_alert,
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn rules(&self) -> &[LatencyRule] {
        &self.rules
    }

    /// Record a completed request. Never blocks on I/O and never fails.
    pub fn observe(&self, observation: &LatencyObservation<'_>) {
        if !observation.duration_ms.is_finite() || observation.duration_ms < 0.0 {
            tracing::debug!(
                duration_ms = observation.duration_ms,
                path = %observation.path,
                "Ignoring invalid latency sample"
            );
            return;
        }

        let alerts = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            let now = self.clock.now_ms();
            if now.saturating_sub(state.started_at_ms) >= self.window_ms {
                state.started_at_ms = now;
                state.routes.iter_mut().for_each(|r| *r = RouteWindow::default());
            }

            let mut alerts = Vec::new();
            for (rule, route) in self.rules.iter().zip(state.routes.iter_mut()) {
                if !rule.matches(observation.method, observation.path) {
                    continue;
                }

                route.samples.push(observation.duration_ms);
                if route.alerted || route.samples.len() < rule.min_samples {
                    continue;
                }

                let Some(value) = p95(&route.samples) else {
                    continue;
                };
                if value < rule.p95_threshold_ms as f64 {
                    continue;
                }

                route.alerted = true;
                alerts.push(LatencyAlert {
                    id: rule.id.clone(),
                    method: rule.method.to_string(),
                    path: observation.path.to_string(),
                    p95_ms: value.round() as u64,
                    threshold_ms: rule.p95_threshold_ms,
                    sample_count: route.samples.len(),
                    status_code: observation.status_code,
                });
            }
            alerts
        };

        // The lock is released so a sink may observe again without deadlocking.
        for alert in &alerts {
            (self.on_alert)(alert);
        }
    }

    pub fn snapshot(&self) -> Vec<RuleSnapshot> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let age = self.clock.now_ms().saturating_sub(state.started_at_ms);
        self.rules
            .iter()
            .zip(state.routes.iter())
            .map(|(rule, route)| RuleSnapshot {
                id: rule.id.clone(),
                window_ms: self.window_ms,
                window_age_ms: age,
                samples: route.samples.len(),
                p95_ms: p95(&route.samples).map(|v| v.round() as u64),
                alerted: route.alerted,
            })
            .collect()
    }
}

/// All detectors built from configuration, one per distinct window length.
#[derive(Default)]
pub struct LatencyMonitor {
    detectors: Vec<LatencyDetector>,
}

impl LatencyMonitor {
    pub fn new(detectors: Vec<LatencyDetector>) -> Self {
        Self { detectors }
    }

    /// Compile configured rules. Rules with an invalid pattern or method are dropped.
    pub fn from_config(config: &LatencyConfig, on_alert: AlertSink, clock: Arc<dyn Clock>) -> Self {
        let mut groups: Vec<(u64, Vec<LatencyRule>)> = Vec::new();

        for rule in &config.rules {
            let Some(method) = parse_method(&rule.method) else {
                tracing::warn!(rule = %rule.id, method = %rule.method, "Ignoring latency rule with invalid method");
                continue;
            };
            let compiled = match LatencyRule::new(
                rule.id.clone(),
                method,
                &rule.path_pattern,
                rule.p95_threshold_ms,
                rule.min_samples,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(rule = %rule.id, error = %e, "Ignoring latency rule with invalid pattern");
                    continue;
                }
            };

            let window_ms = rule.window_ms.unwrap_or(config.window_ms);
            match groups.iter_mut().find(|(w, _)| *w == window_ms) {
                Some((_, rules)) => rules.push(compiled),
                None => groups.push((window_ms, vec![compiled])),
            }
        }

        let detectors = groups
            .into_iter()
            .map(|(window_ms, rules)| LatencyDetector::new(rules, window_ms, on_alert.clone(), clock.clone()))
            .collect::<Vec<_>>();
        tracing::info!(
            detectors = detectors.len(),
            rules = detectors.iter().map(|d| d.rules.len()).sum::<usize>(),
            "Latency monitor configured"
        );
        Self { detectors }
    }

    pub fn observe(&self, observation: &LatencyObservation<'_>) {
        for detector in &self.detectors {
            detector.observe(observation);
        }
    }

    pub fn snapshot(&self) -> Vec<RuleSnapshot> {
        self.detectors.iter().flat_map(|d| d.snapshot()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}
