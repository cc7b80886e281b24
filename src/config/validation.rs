//! Configuration validation.
//!
//! Serde handles syntax; this checks values and cross-references. All errors are
//! collected so an operator sees every problem in one pass. Bad origin entries and
//! bad latency patterns are not errors here: they are dropped with a warning when
//! the components are built.

use std::collections::HashSet;

use axum::http::Method;

use crate::config::schema::GovernanceConfig;
use crate::security::rate_limit::KeyExtractor;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rate limit `{0}`: window_secs must be greater than zero")]
    ZeroWindow(String),
    #[error("rate limit `{0}`: max_requests must be greater than zero")]
    ZeroMaxRequests(String),
    #[error("rate limit `{0}`: key_prefix must not be empty")]
    EmptyKeyPrefix(String),
    #[error("rate limit `{name}`: unsupported key `{key}` (expected `ip` or `header:<name>`)")]
    InvalidKey { name: String, key: String },
    #[error("rate limit `{name}`: invalid method `{method}`")]
    InvalidMethod { name: String, method: String },
    #[error("duplicate rate limit name `{0}`")]
    DuplicatePolicy(String),
    #[error("latency rule `{0}`: min_samples must be greater than zero")]
    ZeroMinSamples(String),
    #[error("latency rule `{0}`: window_ms must be greater than zero")]
    ZeroRuleWindow(String),
    #[error("duplicate latency rule id `{0}`")]
    DuplicateRule(String),
    #[error("latency.window_ms must be greater than zero")]
    ZeroLatencyWindow,
    #[error("store.timeout_ms must be greater than zero")]
    ZeroStoreTimeout,
    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a parsed configuration, returning every problem found.
pub fn validate_config(config: &GovernanceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for policy in &config.rate_limits {
        if !names.insert(policy.name.as_str()) {
            errors.push(ValidationError::DuplicatePolicy(policy.name.clone()));
        }
        if policy.window_secs == 0 {
            errors.push(ValidationError::ZeroWindow(policy.name.clone()));
        }
        if policy.max_requests == 0 {
            errors.push(ValidationError::ZeroMaxRequests(policy.name.clone()));
        }
        if policy.key_prefix.trim().is_empty() {
            errors.push(ValidationError::EmptyKeyPrefix(policy.name.clone()));
        }
        if KeyExtractor::from_spec(&policy.key).is_none() {
            errors.push(ValidationError::InvalidKey {
                name: policy.name.clone(),
                key: policy.key.clone(),
            });
        }
        for method in &policy.methods {
            if parse_method(method).is_none() {
                errors.push(ValidationError::InvalidMethod {
                    name: policy.name.clone(),
                    method: method.clone(),
                });
            }
        }
    }

    if config.latency.window_ms == 0 {
        errors.push(ValidationError::ZeroLatencyWindow);
    }

    let mut ids = HashSet::new();
    for rule in &config.latency.rules {
        if !ids.insert(rule.id.as_str()) {
            errors.push(ValidationError::DuplicateRule(rule.id.clone()));
        }
        if rule.min_samples == 0 {
            errors.push(ValidationError::ZeroMinSamples(rule.id.clone()));
        }
        if rule.window_ms == Some(0) {
            errors.push(ValidationError::ZeroRuleWindow(rule.id.clone()));
        }
    }

    if config.store.timeout_ms == 0 {
        errors.push(ValidationError::ZeroStoreTimeout);
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::MissingAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a configured HTTP method name, case-insensitively.
pub fn parse_method(raw: &str) -> Option<Method> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    Method::from_bytes(upper.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LatencyRuleConfig, RateLimitPolicyConfig};

    fn policy(name: &str) -> RateLimitPolicyConfig {
        RateLimitPolicyConfig {
            name: name.into(),
            path_prefix: "/api".into(),
            methods: vec![],
            window_secs: 60,
            max_requests: 10,
            key_prefix: "api".into(),
            key: "ip".into(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GovernanceConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GovernanceConfig::default();
        let mut bad = policy("bad");
        bad.window_secs = 0;
        bad.max_requests = 0;
        bad.key = "cookie:session".into();
        config.rate_limits.push(bad);
        config.rate_limits.push(policy("dup"));
        config.rate_limits.push(policy("dup"));
        config.latency.rules.push(LatencyRuleConfig {
            id: "r".into(),
            method: "GET".into(),
            path_pattern: "^/api".into(),
            p95_threshold_ms: 500,
            min_samples: 0,
            window_ms: Some(0),
        });
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroWindow("bad".into())));
        assert!(errors.contains(&ValidationError::ZeroMaxRequests("bad".into())));
        assert!(errors.contains(&ValidationError::InvalidKey {
            name: "bad".into(),
            key: "cookie:session".into()
        }));
        assert!(errors.contains(&ValidationError::DuplicatePolicy("dup".into())));
        assert!(errors.contains(&ValidationError::ZeroMinSamples("r".into())));
        assert!(errors.contains(&ValidationError::ZeroRuleWindow("r".into())));
        assert!(errors.contains(&ValidationError::MissingAdminKey));
    }

    #[test]
    fn test_malformed_latency_rule_is_not_fatal() {
        // Bad methods and patterns are dropped when the monitor is built.
        let mut config = GovernanceConfig::default();
        config.latency.rules.push(LatencyRuleConfig {
            id: "r".into(),
            method: "GE T".into(),
            path_pattern: "^/(".into(),
            p95_threshold_ms: 500,
            min_samples: 1,
            window_ms: None,
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("post"), Some(Method::POST));
        assert_eq!(parse_method(" GET "), Some(Method::GET));
        assert_eq!(parse_method(""), None);
        assert_eq!(parse_method("GE T"), None);
    }
}
