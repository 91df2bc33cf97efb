//! Configuration loading and validation for the process engine
//!
//! The TOML file is a flat table of `schema::EngineConfig` fields in
//! camelCase. Missing fields take the serde defaults from `schema`; present
//! fields are checked with field-path error messages.

use crate::{CoreError, Result};
use schema::EngineConfig;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Load engine configuration from a TOML file path
pub fn load_engine_config_from_toml_path(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_engine_config_from_toml_str(&data)
}

/// Load engine configuration from a TOML string
pub fn load_engine_config_from_toml_str(input: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    validate_engine_config(&cfg)?;
    Ok(cfg)
}

/// Validate engine configuration, reporting the first offending field
pub fn validate_engine_config(cfg: &EngineConfig) -> Result<()> {
    if cfg.poll_initial_interval_ms == 0 {
        return Err(CoreError::ValidationError(
            "pollInitialIntervalMs: must be greater than 0".to_string(),
        ));
    }
    if cfg.poll_max_interval_ms < cfg.poll_initial_interval_ms {
        return Err(CoreError::ValidationError(format!(
            "pollMaxIntervalMs: must be >= pollInitialIntervalMs ({})",
            cfg.poll_initial_interval_ms
        )));
    }
    if cfg.destroy_timeout_secs == 0 {
        return Err(CoreError::ValidationError(
            "destroyTimeoutSecs: must be greater than 0".to_string(),
        ));
    }
    if cfg.event_channel_capacity == 0 {
        return Err(CoreError::ValidationError(
            "eventChannelCapacity: must be greater than 0".to_string(),
        ));
    }
    if cfg.log_level.trim().is_empty() {
        return Err(CoreError::ValidationError(
            "logLevel: cannot be empty".to_string(),
        ));
    }
    EnvFilter::try_new(&cfg.log_level).map_err(|e| {
        CoreError::ValidationError(format!("logLevel: invalid filter '{}': {}", cfg.log_level, e))
    })?;
    Ok(())
}
