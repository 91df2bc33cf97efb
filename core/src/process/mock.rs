//! In-memory process table for testing
//!
//! Lets tests build arbitrary process trees, make processes exit, turn them
//! into zombies, reuse pids, or hide them behind a permission wall, without
//! touching the real OS.

use super::{Probe, ProcessStat, ProcessTable};
use schema::{Termination, TerminationSignal};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A fake process in the mock table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MockProcess {
    ppid: u32,
    start_time: Option<u64>,
    zombie: bool,
    restricted: bool,
    ignores_signals: bool,
}

#[derive(Debug, Default)]
struct MockState {
    processes: BTreeMap<u32, MockProcess>,
    exit_codes: HashMap<u32, i32>,
    terminations: Vec<(u32, TerminationSignal)>,
}

/// Mock process table for testing
#[derive(Debug, Default)]
pub struct MockProcessTable {
    state: Mutex<MockState>,
}

impl MockProcessTable {
    /// Create an empty mock table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, pid: u32, process: MockProcess) {
        let mut state = self.lock();
        state.exit_codes.remove(&pid);
        state.processes.insert(pid, process);
    }

    /// Add a running process
    pub fn add(&self, pid: u32, ppid: u32, start_time: u64) {
        self.insert(
            pid,
            MockProcess {
                ppid,
                start_time: Some(start_time),
                zombie: false,
                restricted: false,
                ignores_signals: false,
            },
        );
    }

    /// Add a running process whose details and signals are off limits
    pub fn add_restricted(&self, pid: u32, ppid: u32) {
        self.insert(
            pid,
            MockProcess {
                ppid,
                start_time: None,
                zombie: false,
                restricted: true,
                ignores_signals: false,
            },
        );
    }

    /// Add a running process that accepts signals but never dies from them
    pub fn add_stubborn(&self, pid: u32, ppid: u32, start_time: u64) {
        self.insert(
            pid,
            MockProcess {
                ppid,
                start_time: Some(start_time),
                zombie: false,
                restricted: false,
                ignores_signals: true,
            },
        );
    }

    /// Make a process exit and disappear, optionally leaving a recoverable exit code
    pub fn exit(&self, pid: u32, exit_code: Option<i32>) {
        let mut state = self.lock();
        state.processes.remove(&pid);
        if let Some(code) = exit_code {
            state.exit_codes.insert(pid, code);
        }
    }

    /// Make a process exit but stay in the table as a zombie
    pub fn zombify(&self, pid: u32) {
        if let Some(process) = self.lock().processes.get_mut(&pid) {
            process.zombie = true;
        }
    }

    /// Replace a process with a new one that reuses its pid
    pub fn reuse(&self, pid: u32, ppid: u32, start_time: u64) {
        self.add(pid, ppid, start_time);
    }

    /// Every termination request received so far
    pub fn terminations(&self) -> Vec<(u32, TerminationSignal)> {
        self.lock().terminations.clone()
    }

    /// Whether a non-zombie process with this pid is present
    pub fn is_running(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .get(&pid)
            .is_some_and(|process| !process.zombie)
    }
}

impl ProcessTable for MockProcessTable {
    fn probe(&self, pid: u32) -> Probe {
        match self.lock().processes.get(&pid) {
            None => Probe::Gone,
            Some(process) if process.restricted => Probe::AccessDenied,
            Some(process) if process.zombie => Probe::Zombie {
                start_time: process.start_time,
            },
            Some(process) => Probe::Running {
                start_time: process.start_time,
            },
        }
    }

    fn query_parent(&self, pid: u32) -> Option<u32> {
        self.lock()
            .processes
            .get(&pid)
            .filter(|process| process.ppid != 0)
            .map(|process| process.ppid)
    }

    fn query_exit_code(&self, pid: u32) -> Option<i32> {
        self.lock().exit_codes.get(&pid).copied()
    }

    fn snapshot(&self) -> Vec<ProcessStat> {
        self.lock()
            .processes
            .iter()
            .filter(|(_, process)| !process.restricted)
            .map(|(&pid, process)| ProcessStat {
                pid,
                ppid: process.ppid,
                start_time: process.start_time,
                zombie: process.zombie,
            })
            .collect()
    }

    fn request_termination(&self, pid: u32, signal: TerminationSignal) -> Termination {
        let mut state = self.lock();
        state.terminations.push((pid, signal));

        let Some(process) = state.processes.get(&pid).copied() else {
            return Termination::AlreadyExited;
        };
        if process.restricted {
            return Termination::AccessDenied;
        }
        if process.zombie {
            return Termination::AlreadyExited;
        }
        if !process.ignores_signals {
            debug!("Mock process {} terminated by {:?}", pid, signal);
            state.processes.remove(&pid);
            let signo = match signal {
                TerminationSignal::Term => 15,
                TerminationSignal::Kill => 9,
            };
            state.exit_codes.insert(pid, 128 + signo);
        }
        Termination::Requested
    }
}
