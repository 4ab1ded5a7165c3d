//! Configuration management for the lead processing pipeline
//!
//! Supports loading configuration from:
//! - TOML files (config/default.toml plus an environment overlay)
//! - Environment variables (LEADPIPE_ prefix, `__` separator)
//!
//! Every section has serde defaults so a bare deployment works out of the
//! box; `Settings::validate()` runs at load time so misconfiguration is
//! rejected before any queue or provider is constructed.

pub mod settings;

pub use settings::{
    load_settings, CacheSettings, OrchestratorSettings, ProviderKind, ProviderSettings,
    QueueSettings, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] config::ConfigError),
}
