//! Exit records and per-process outcome types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Terminal information about a process, captured once when its exit is observed
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitRecord {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal or unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that terminated the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Timestamp when the exit was detected
    pub timestamp: String,
}

impl ExitRecord {
    /// Record for a process that exited with the given code
    #[must_use]
    pub fn exited(pid: u32, exit_code: i32) -> Self {
        Self {
            pid,
            exit_code: Some(exit_code),
            signal: None,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Record for a process terminated by a signal
    #[must_use]
    pub fn signaled(pid: u32, signal: i32) -> Self {
        Self {
            pid,
            exit_code: None,
            signal: Some(signal),
            timestamp: crate::current_timestamp(),
        }
    }

    /// Record for a process whose exit was observed but whose status could not be recovered
    #[must_use]
    pub fn unknown(pid: u32) -> Self {
        Self {
            pid,
            exit_code: None,
            signal: None,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Whether the exit status is known
    #[must_use]
    pub fn is_code_known(&self) -> bool {
        self.exit_code.is_some() || self.signal.is_some()
    }

    /// Check if this represents a successful exit (code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Check if this represents a known failure (non-zero exit code or signal)
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.is_code_known() && !self.is_success()
    }

    /// Shell-style exit value: the exit code, or `128 + signal`
    #[must_use]
    pub fn exit_value(&self) -> Option<i32> {
        match (self.exit_code, self.signal) {
            (Some(code), _) => Some(code),
            (None, Some(signal)) => Some(128 + signal),
            (None, None) => None,
        }
    }
}

/// Result of asking the OS to terminate a process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    /// The signal was delivered
    Requested,
    /// The process had already exited; not an error
    AlreadyExited,
    /// Insufficient privilege to signal the process
    AccessDenied,
}

/// How an exit watcher observes termination
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WatchStrategy {
    /// Blocking wait on a tracked child; reaps the exit status
    Reap,
    /// Periodic liveness polling of an arbitrary process
    Poll,
}

/// Overall result of a tree destroy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DestroyStatus {
    /// Every requested termination was observed
    AllExited,
    /// The deadline passed with some processes still live
    TimedOut {
        /// Number of processes whose exit was not observed
        still_live: usize,
    },
}
