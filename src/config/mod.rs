//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → GovernanceConfig (validated, immutable)
//!     → components built once and shared via Arc
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; components never observe partial updates
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, EnvironmentMode, GovernanceConfig, LatencyConfig, LatencyRuleConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, OriginConfig, RateLimitPolicyConfig,
    StoreConfig,
};
