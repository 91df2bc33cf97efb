//! Schema definitions for procwatch
//!
//! This crate contains the data structures that leave the engine: exit
//! records, the diagnostic event stream and the engine configuration. All
//! types here implement JSON Schema generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub mod events;
pub mod exit;

pub use events::*;
pub use exit::*;

/// Create a current timestamp string in RFC3339 format (millisecond precision)
#[must_use]
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}

/// Signal used when the engine asks a process to terminate
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TerminationSignal {
    /// Graceful request (SIGTERM)
    Term,
    /// Forceful kill (SIGKILL)
    #[default]
    Kill,
}

/// Runtime configuration for the process engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// First delay between liveness polls of a non-child process
    #[serde(default = "default_poll_initial_interval_ms")]
    pub poll_initial_interval_ms: u64,
    /// Upper bound of the exponential poll backoff
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,
    /// Overall deadline for a tree destroy to observe every exit
    #[serde(default = "default_destroy_timeout_secs")]
    pub destroy_timeout_secs: u64,
    /// Capacity of the diagnostic event broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Signal sent by tree destruction
    #[serde(default)]
    pub destroy_signal: TerminationSignal,
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl EngineConfig {
    /// Initial poll interval as a `Duration`
    #[must_use]
    pub fn poll_initial_interval(&self) -> Duration {
        Duration::from_millis(self.poll_initial_interval_ms)
    }

    /// Maximum poll interval as a `Duration`
    #[must_use]
    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms)
    }

    /// Tree destroy deadline as a `Duration`
    #[must_use]
    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_secs(self.destroy_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_initial_interval_ms: default_poll_initial_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            destroy_timeout_secs: default_destroy_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            destroy_signal: TerminationSignal::default(),
            log_level: default_log_level(),
        }
    }
}

/// Default first poll delay (20 ms)
pub const fn default_poll_initial_interval_ms() -> u64 {
    20
}

/// Default poll backoff cap (1 s)
pub const fn default_poll_max_interval_ms() -> u64 {
    1_000
}

/// Default tree destroy deadline (10 s)
pub const fn default_destroy_timeout_secs() -> u64 {
    10
}

/// Default event channel capacity
pub const fn default_event_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}
