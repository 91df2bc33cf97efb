//! Diagnostic event stream for the process engine
//!
//! The engine never formats or prints anything itself. Instead it emits these
//! events at the interesting points of a process's life so an external
//! logger, printer or monitoring bridge can render them however it likes:
//! - when a process is first observed and given a handle
//! - when an exit watcher starts, delivers, or fails
//! - when termination is requested and when a tree destroy finishes

use crate::exit::{DestroyStatus, ExitRecord, Termination, WatchStrategy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Events emitted by the process engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum ProcessEvent {
    /// A process was registered with a handle for the first time
    ProcessObserved {
        /// Process ID
        pid: u32,
        /// Start time in clock ticks since boot, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        /// Whether the process was spawned by this engine
        tracked_child: bool,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// An exit watcher began observing a process
    WatchStarted {
        /// Process ID
        pid: u32,
        /// Reap or poll
        strategy: WatchStrategy,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A completion was fulfilled with the process's exit record
    CompletionDelivered {
        /// Exit information
        exit: ExitRecord,
    },

    /// A watcher could not determine the process's exit
    WatchFailed {
        /// Process ID
        pid: u32,
        /// Failure description
        message: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A termination signal was requested for a process
    TerminationRequested {
        /// Process ID
        pid: u32,
        /// What the OS reported
        outcome: Termination,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A tree destroy finished or timed out
    DestroyOutcome {
        /// Root of the destroyed tree
        root_pid: u32,
        /// Number of processes termination was requested for (root included)
        requested: usize,
        /// Number of requests refused for lack of privilege
        access_denied: usize,
        /// Overall result
        status: DestroyStatus,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },
}

/// Event severity level for filtering and alerting
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub enum EventSeverity {
    /// Debug information
    Debug,
    /// Informational events
    Info,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
}

impl ProcessEvent {
    /// Process the event is about (the root for tree destroys)
    #[must_use]
    pub fn pid(&self) -> u32 {
        match self {
            Self::ProcessObserved { pid, .. }
            | Self::WatchStarted { pid, .. }
            | Self::WatchFailed { pid, .. }
            | Self::TerminationRequested { pid, .. } => *pid,
            Self::CompletionDelivered { exit } => exit.pid,
            Self::DestroyOutcome { root_pid, .. } => *root_pid,
        }
    }

    /// Get the timestamp for this event
    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::CompletionDelivered { exit } => &exit.timestamp,
            Self::ProcessObserved { timestamp, .. }
            | Self::WatchStarted { timestamp, .. }
            | Self::WatchFailed { timestamp, .. }
            | Self::TerminationRequested { timestamp, .. }
            | Self::DestroyOutcome { timestamp, .. } => timestamp,
        }
    }

    /// Get the severity level for this event
    #[must_use]
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::ProcessObserved { .. } | Self::WatchStarted { .. } => EventSeverity::Debug,
            Self::CompletionDelivered { .. } => EventSeverity::Info,
            Self::TerminationRequested { outcome, .. } => match outcome {
                Termination::Requested | Termination::AlreadyExited => EventSeverity::Info,
                Termination::AccessDenied => EventSeverity::Warning,
            },
            Self::DestroyOutcome { status, .. } => match status {
                DestroyStatus::AllExited => EventSeverity::Info,
                DestroyStatus::TimedOut { .. } => EventSeverity::Warning,
            },
            Self::WatchFailed { .. } => EventSeverity::Error,
        }
    }

    /// Create a process observed event
    #[must_use]
    pub fn process_observed(pid: u32, start_time: Option<u64>, tracked_child: bool) -> Self {
        Self::ProcessObserved {
            pid,
            start_time,
            tracked_child,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Create a watch started event
    #[must_use]
    pub fn watch_started(pid: u32, strategy: WatchStrategy) -> Self {
        Self::WatchStarted {
            pid,
            strategy,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Create a completion delivered event
    #[must_use]
    pub fn completion_delivered(exit: ExitRecord) -> Self {
        Self::CompletionDelivered { exit }
    }

    /// Create a watch failed event
    #[must_use]
    pub fn watch_failed(pid: u32, message: String) -> Self {
        Self::WatchFailed {
            pid,
            message,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Create a termination requested event
    #[must_use]
    pub fn termination_requested(pid: u32, outcome: Termination) -> Self {
        Self::TerminationRequested {
            pid,
            outcome,
            timestamp: crate::current_timestamp(),
        }
    }

    /// Create a destroy outcome event
    #[must_use]
    pub fn destroy_outcome(
        root_pid: u32,
        requested: usize,
        access_denied: usize,
        status: DestroyStatus,
    ) -> Self {
        Self::DestroyOutcome {
            root_pid,
            requested,
            access_denied,
            status,
            timestamp: crate::current_timestamp(),
        }
    }
}
