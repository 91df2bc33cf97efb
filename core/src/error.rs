//! Core error types and utilities

use thiserror::Error;

/// Why an exit watcher could not deliver an exit record
///
/// Carried inside completion outcomes, so it is cheap to clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The liveness of the process cannot be queried
    #[error("Access denied watching process {pid}")]
    AccessDenied {
        /// Watched process
        pid: u32,
    },

    /// The OS wait on a tracked child failed
    #[error("Failed to wait for process {pid}: {message}")]
    WaitFailed {
        /// Watched process
        pid: u32,
        /// OS error text
        message: String,
    },
}

impl WatchError {
    /// Process the failed watch was for
    pub fn pid(&self) -> u32 {
        match self {
            WatchError::AccessDenied { pid } | WatchError::WaitFailed { pid, .. } => *pid,
        }
    }
}

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Spawn failure: {0}")]
    SpawnFailure(String),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NoSuchProcess(_) => "PROC001",
            CoreError::AccessDenied(_) => "PROC002",
            CoreError::SpawnFailure(_) => "PROC003",
            CoreError::Watch(_) => "PROC004",
            CoreError::ConfigurationError(_) => "PROC005",
            CoreError::ValidationError(_) => "PROC006",
            CoreError::InitializationError(_) => "PROC009",
            CoreError::Other(_) => "PROC999",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}
