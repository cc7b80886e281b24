//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::GovernanceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable selecting the deployment mode.
pub const ENV_MODE: &str = "GOVERNANCE_ENV";
/// Environment variable overriding the allowed origins list.
pub const ENV_ALLOWED_ORIGINS: &str = "GOVERNANCE_ALLOWED_ORIGINS";
/// Environment variable overriding the Redis URL.
pub const ENV_REDIS_URL: &str = "GOVERNANCE_REDIS_URL";
/// Environment variable overriding the listener address.
pub const ENV_BIND_ADDRESS: &str = "GOVERNANCE_BIND_ADDRESS";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {var}: {source}")]
    Environment {
        var: &'static str,
        #[source]
        source: crate::config::schema::UnknownEnvironment,
    },
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment overrides and validate.
///
/// Without a file every section falls back to its defaults.
pub fn load_config(path: Option<&Path>) -> Result<GovernanceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => GovernanceConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<GovernanceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overlay environment-style settings on top of file configuration.
pub fn apply_env_overrides<F>(config: &mut GovernanceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup(ENV_MODE) {
        config.environment = mode
            .parse()
            .map_err(|source| ConfigError::Environment { var: ENV_MODE, source })?;
    }
    if let Some(origins) = lookup(ENV_ALLOWED_ORIGINS) {
        config.origins.allowed = origins;
    }
    if let Some(url) = lookup(ENV_REDIS_URL).filter(|u| !u.trim().is_empty()) {
        config.store.redis_url = Some(url);
    }
    if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
        config.listener.bind_address = addr;
    }
    Ok(())
}
