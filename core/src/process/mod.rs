//! Operating-system process table boundary
//!
//! Everything the engine needs to know about processes it did not spawn goes
//! through the [`ProcessTable`] trait: liveness probes, parent lookups, a
//! point-in-time scan of the whole table, and termination requests. The
//! engine logic above this layer never touches `/proc` or signals directly,
//! so it can be exercised against [`MockProcessTable`].
//!
//! ## Platform Support
//!
//! - **Linux**: full support via `/proc/<pid>/stat` and `kill(2)`
//! - **Other Unix**: liveness and termination via `kill(2)`; no tree scans

use schema::{Termination, TerminationSignal};
use std::collections::HashMap;

pub mod mock;
#[cfg(unix)]
pub mod unix;

pub use mock::MockProcessTable;
#[cfg(unix)]
pub use unix::UnixProcessTable;

/// What the process table reports about a pid right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A process with this pid is running
    Running {
        /// Start time in clock ticks since boot, when readable
        start_time: Option<u64>,
    },
    /// The process has exited but has not been reaped by its parent
    Zombie {
        /// Start time in clock ticks since boot, when readable
        start_time: Option<u64>,
    },
    /// No process with this pid exists
    Gone,
    /// A process may exist but cannot be inspected
    AccessDenied,
}

impl Probe {
    /// Whether this probe shows a running process matching the given start time
    ///
    /// A missing start time on either side cannot rule out a match.
    pub fn is_running_instance(&self, start_time: Option<u64>) -> bool {
        match self {
            Probe::Running { start_time: seen } => start_times_compatible(*seen, start_time),
            _ => false,
        }
    }

    /// Start time carried by the probe, if any
    pub fn start_time(&self) -> Option<u64> {
        match self {
            Probe::Running { start_time } | Probe::Zombie { start_time } => *start_time,
            Probe::Gone | Probe::AccessDenied => None,
        }
    }
}

pub(crate) fn start_times_compatible(a: Option<u64>, b: Option<u64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// One row of a process table scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStat {
    /// Process ID
    pub pid: u32,
    /// Parent process ID (0 when the process has no parent)
    pub ppid: u32,
    /// Start time in clock ticks since boot, when readable
    pub start_time: Option<u64>,
    /// Whether the process has exited and awaits reaping
    pub zombie: bool,
}

/// Source of process information and termination requests
pub trait ProcessTable: Send + Sync + std::fmt::Debug {
    /// Inspect a single pid
    fn probe(&self, pid: u32) -> Probe;

    /// Parent pid, if the process exists and has one
    fn query_parent(&self, pid: u32) -> Option<u32>;

    /// Exit code of an exited process that this engine did not spawn.
    ///
    /// Most platforms cannot recover this for arbitrary processes and return `None`.
    fn query_exit_code(&self, pid: u32) -> Option<i32>;

    /// Scan every process visible at this instant
    fn snapshot(&self) -> Vec<ProcessStat>;

    /// Send a termination signal
    fn request_termination(&self, pid: u32, signal: TerminationSignal) -> Termination;
}

/// Everything needed to start a tracked child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Environment variables set on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Place the child in a new process group
    pub process_group: bool,
}

impl SpawnRequest {
    /// Request for the given program and arguments
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add an environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start the child in its own process group
    pub fn process_group(mut self, enabled: bool) -> Self {
        self.process_group = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_instance_matching() {
        let probe = Probe::Running {
            start_time: Some(100),
        };
        assert!(probe.is_running_instance(Some(100)));
        assert!(!probe.is_running_instance(Some(101)));
        assert!(probe.is_running_instance(None));

        let unknown = Probe::Running { start_time: None };
        assert!(unknown.is_running_instance(Some(5)));

        assert!(!Probe::Zombie {
            start_time: Some(100)
        }
        .is_running_instance(Some(100)));
        assert!(!Probe::Gone.is_running_instance(None));
        assert!(!Probe::AccessDenied.is_running_instance(None));
    }

    #[test]
    fn test_spawn_request_builder() {
        let req = SpawnRequest::new(["sh", "-c", "exit 3"])
            .env("FOO", "bar")
            .process_group(true);
        assert_eq!(req.argv, vec!["sh", "-c", "exit 3"]);
        assert_eq!(req.env.get("FOO").map(String::as_str), Some("bar"));
        assert!(req.process_group);
    }
}
