//! Layered configuration for all three agentmesh services.
//!
//! Loaded the way the teacher loads it: struct defaults, then an optional
//! TOML file, then environment variables (highest priority). See
//! SPEC_FULL.md §[MODULE: config] for the rationale behind the flat,
//! unprefixed env var names.

mod models;
mod sources;
mod validation;

pub use models::Config;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    #[cfg(test)]
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_path(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
