//! Core functionality for procwatch
//!
//! Stable handles to operating-system processes, exit notification that
//! fires exactly once per process, descendant enumeration and tree
//! destruction. Everything hangs off an explicitly constructed
//! [`ProcessRegistry`]:
//!
//! ```no_run
//! # async fn demo() -> procwatch_core::Result<()> {
//! use procwatch_core::{EngineConfig, ProcessRegistry, SpawnRequest};
//!
//! let registry = ProcessRegistry::unix(EngineConfig::default())?;
//! let child = registry.spawn(&SpawnRequest::new(["sh", "-c", "exit 3"]))?;
//! let exit = registry.on_exit(&child).await?;
//! assert_eq!(exit.record.exit_code, Some(3));
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod destroy;
pub mod error;
pub mod handle;
pub mod notifier;
pub mod process;
pub mod registry;
pub mod tree;
mod watcher;


// Re-export schema types for convenience
pub use schema::*;

pub use completion::{CompletionFuture, ExitOutcome, ProcessExit};
pub use config::{
    load_engine_config_from_toml_path, load_engine_config_from_toml_str, validate_engine_config,
};
pub use destroy::{DestroyReport, ProcessOutcome, TreeDestroyer};
pub use error::{CoreError, Result, WatchError};
pub use handle::ProcessHandle;
pub use notifier::{wait_all, CollectedExits};
pub use process::{MockProcessTable, Probe, ProcessStat, ProcessTable, SpawnRequest};
#[cfg(unix)]
pub use process::UnixProcessTable;
pub use registry::ProcessRegistry;
pub use tree::ProcessTreeWalker;

/// Core utilities and helper functions
pub mod utils {
    use tracing::{debug, info};

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }

    /// Validate the configuration and initialize tracing at its log level
    pub fn init_tracing_from_config(config: &crate::EngineConfig) -> crate::Result<()> {
        crate::validate_engine_config(config)?;
        debug!("Configuration validated successfully");
        init_tracing(&config.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_rejects_invalid_config() {
        let config = EngineConfig {
            poll_initial_interval_ms: 0,
            ..EngineConfig::default()
        };
        let err = utils::init_tracing_from_config(&config).unwrap_err();
        assert_eq!(err.code(), "PROC006");
    }

    #[test]
    fn test_init_tracing_twice_fails() {
        // The first call may lose to another test installing a subscriber
        let _ = utils::init_tracing("debug");
        let err = utils::init_tracing("debug").unwrap_err();
        assert!(matches!(err, CoreError::InitializationError(_)));
    }
}
