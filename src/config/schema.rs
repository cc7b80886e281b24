//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the governance layer.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the governance layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Deployment mode; relaxes origin checks in development.
    pub environment: EnvironmentMode,

    /// Allowed browser origins.
    pub origins: OriginConfig,

    /// Shared counter store used by the rate limiter.
    pub store: StoreConfig,

    /// Per-route rate limit policies, evaluated in order (first match wins).
    pub rate_limits: Vec<RateLimitPolicyConfig>,

    /// Latency regression rules.
    pub latency: LatencyConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Deployment environment the service runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    #[default]
    Development,
    Production,
    Test,
}

impl EnvironmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentMode::Development => "development",
            EnvironmentMode::Production => "production",
            EnvironmentMode::Test => "test",
        }
    }
}

impl fmt::Display for EnvironmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an environment name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment mode `{0}`")]
pub struct UnknownEnvironment(pub String);

impl FromStr for EnvironmentMode {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentMode::Development),
            "production" | "prod" => Ok(EnvironmentMode::Production),
            "test" => Ok(EnvironmentMode::Test),
            _ => Err(UnknownEnvironment(s.to_string())),
        }
    }
}

/// Browser origin allow-list.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OriginConfig {
    /// Comma-separated origins; `*` allows any origin.
    pub allowed: String,
}

/// Counter store connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL. When unset, counters are kept in process memory.
    pub redis_url: Option<String>,

    /// Deadline for one rate-limit round trip before failing open.
    pub timeout_ms: u64,

    /// Deadline for the initial connection at startup.
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            timeout_ms: 250,
            connect_timeout_ms: 2_000,
        }
    }
}

/// One rate limit policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitPolicyConfig {
    /// Policy identifier for logging/metrics.
    pub name: String,

    /// Path prefix the policy applies to.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// HTTP methods the policy applies to; empty means all methods.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Length of the trailing window in seconds.
    pub window_secs: u64,

    /// Requests allowed per subject within one window.
    pub max_requests: u64,

    /// Namespace for the counter key.
    pub key_prefix: String,

    /// Subject extraction: `ip` or `header:<name>`.
    #[serde(default = "default_key_spec")]
    pub key: String,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_key_spec() -> String {
    "ip".to_string()
}

/// Latency regression settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Global window size in milliseconds.
    pub window_ms: u64,

    pub rules: Vec<LatencyRuleConfig>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            rules: Vec::new(),
        }
    }
}

/// One latency rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LatencyRuleConfig {
    pub id: String,

    /// HTTP method to match (case-insensitive).
    pub method: String,

    /// Regular expression matched against the request path.
    pub path_pattern: String,

    pub p95_threshold_ms: u64,

    /// Samples required in the window before the rule may alert.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Overrides `latency.window_ms` for this rule.
    #[serde(default)]
    pub window_ms: Option<u64>,
}

fn default_min_samples() -> usize {
    20
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
