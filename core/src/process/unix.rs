//! Unix process table and tracked-child spawning
//!
//! Liveness, parentage and start times come from `/proc/<pid>/stat` on Linux.
//! The start time (field 22, clock ticks since boot) is what lets a handle
//! tell its own process apart from a later process that reused the pid.
//! Termination requests are plain `kill(2)` calls.
//!
//! Exit codes of processes we did not spawn cannot be recovered on Unix: only
//! the parent's `wait` sees them, so [`UnixProcessTable::query_exit_code`]
//! always reports `None`.

use super::{Probe, ProcessStat, ProcessTable, SpawnRequest};
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use schema::{Termination, TerminationSignal};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// Process table backed by `/proc` and `kill(2)`
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessTable;

impl UnixProcessTable {
    /// Create a new Unix process table
    pub fn new() -> Self {
        Self
    }
}

/// Fields of `/proc/<pid>/stat` the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatLine {
    pub(crate) state: char,
    pub(crate) ppid: u32,
    pub(crate) start_time: u64,
}

/// Parse the contents of `/proc/<pid>/stat`
///
/// Format: `pid (comm) state ppid pgrp ... starttime ...`. The command name
/// may contain spaces and parentheses, so fields are counted from the last `)`.
pub(crate) fn parse_stat_line(content: &str) -> Option<StatLine> {
    let close = content.rfind(')')?;
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    // fields[0] is field 3 (state); starttime is field 22
    if fields.len() < 20 {
        return None;
    }
    let state = fields[0].chars().next()?;
    let ppid = fields[1].parse().ok()?;
    let start_time = fields[19].parse().ok()?;
    Some(StatLine {
        state,
        ppid,
        start_time,
    })
}

#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> std::io::Result<Option<StatLine>> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
    Ok(parse_stat_line(&content))
}

/// `kill(2)` target for exactly one process; 0 and negative values name groups
fn single_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Existence check via signal 0
fn probe_with_kill(pid: u32) -> Probe {
    let Some(target) = single_pid(pid) else {
        return Probe::Gone;
    };
    match kill(target, None) {
        Ok(()) => Probe::Running { start_time: None },
        Err(Errno::EPERM) => Probe::AccessDenied,
        Err(_) => Probe::Gone,
    }
}

impl ProcessTable for UnixProcessTable {
    #[cfg(target_os = "linux")]
    fn probe(&self, pid: u32) -> Probe {
        match read_stat(pid) {
            Ok(Some(stat)) if matches!(stat.state, 'Z' | 'X') => Probe::Zombie {
                start_time: Some(stat.start_time),
            },
            Ok(Some(stat)) => Probe::Running {
                start_time: Some(stat.start_time),
            },
            Ok(None) => probe_with_kill(pid),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Probe::Gone,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => match probe_with_kill(pid)
            {
                Probe::Gone => Probe::Gone,
                _ => Probe::AccessDenied,
            },
            Err(e) => {
                debug!("Failed to read /proc/{}/stat: {}", pid, e);
                probe_with_kill(pid)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn probe(&self, pid: u32) -> Probe {
        probe_with_kill(pid)
    }

    #[cfg(target_os = "linux")]
    fn query_parent(&self, pid: u32) -> Option<u32> {
        match read_stat(pid) {
            Ok(Some(stat)) if stat.ppid != 0 => Some(stat.ppid),
            _ => None,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn query_parent(&self, _pid: u32) -> Option<u32> {
        None
    }

    fn query_exit_code(&self, _pid: u32) -> Option<i32> {
        None
    }

    #[cfg(target_os = "linux")]
    fn snapshot(&self) -> Vec<ProcessStat> {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to scan /proc: {}", e);
                return Vec::new();
            }
        };

        let mut stats = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes that exit between read_dir and read_stat are skipped
            if let Ok(Some(stat)) = read_stat(pid) {
                stats.push(ProcessStat {
                    pid,
                    ppid: stat.ppid,
                    start_time: Some(stat.start_time),
                    zombie: matches!(stat.state, 'Z' | 'X'),
                });
            }
        }
        stats
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&self) -> Vec<ProcessStat> {
        Vec::new()
    }

    fn request_termination(&self, pid: u32, signal: TerminationSignal) -> Termination {
        let sig = match signal {
            TerminationSignal::Term => Signal::SIGTERM,
            TerminationSignal::Kill => Signal::SIGKILL,
        };
        let Some(target) = single_pid(pid) else {
            debug!("Pid {} does not name a single process", pid);
            return Termination::AlreadyExited;
        };
        debug!("Sending {:?} to process {}", sig, pid);

        match kill(target, sig) {
            Ok(()) => Termination::Requested,
            Err(Errno::ESRCH) => {
                debug!("Process {} already exited", pid);
                Termination::AlreadyExited
            }
            Err(Errno::EPERM) => {
                debug!("Permission denied signaling process {}", pid);
                Termination::AccessDenied
            }
            Err(e) => {
                error!("Failed to send {:?} to process {}: {}", sig, pid, e);
                Termination::AccessDenied
            }
        }
    }
}

/// Spawn a tracked child process
///
/// stdin is closed; stdout and stderr are inherited. With
/// `process_group` set the child leads a new process group, so a later
/// group-wide signal cannot reach the caller.
pub(crate) fn spawn_child(request: &SpawnRequest) -> Result<Child> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| CoreError::ValidationError("argv must not be empty".to_string()))?;

    debug!("Spawning process: {} {:?}", program, args);

    let mut command = Command::new(program);
    command.args(args);
    command.envs(&request.env);
    command.stdin(Stdio::null());
    if request.process_group {
        command.process_group(0);
    }

    command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", program, e);
        CoreError::SpawnFailure(format!("Failed to spawn '{}': {}", program, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "4321 (my (odd) name) S 1200 4321 4321 0 -1 4194304 \
        150 0 0 0 3 1 0 0 20 0 1 0 987654 8192000 200 18446744073709551615";

    #[test]
    fn test_parse_stat_line() {
        let stat = parse_stat_line(SAMPLE).expect("sample should parse");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1200);
        assert_eq!(stat.start_time, 987654);
    }

    #[test]
    fn test_parse_stat_line_rejects_truncated() {
        assert!(parse_stat_line("12 (sh) S 1 12").is_none());
        assert!(parse_stat_line("garbage").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_probe_self_is_running() {
        let table = UnixProcessTable::new();
        let probe = table.probe(std::process::id());
        assert!(matches!(probe, Probe::Running { start_time: Some(_) }));
        assert!(table.query_parent(std::process::id()).is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_snapshot_contains_self() {
        let table = UnixProcessTable::new();
        let me = std::process::id();
        assert!(table.snapshot().iter().any(|stat| stat.pid == me));
    }

    #[test]
    fn test_probe_nonexistent_process() {
        let table = UnixProcessTable::new();
        // Above the default Linux pid_max, so never allocated
        assert_eq!(table.probe(4_999_999), Probe::Gone);
        assert_eq!(
            table.request_termination(4_999_999, TerminationSignal::Term),
            Termination::AlreadyExited
        );
    }

    #[test]
    fn test_group_pids_never_signalled() {
        let table = UnixProcessTable::new();
        for pid in [0, i32::MAX as u32 + 1, u32::MAX] {
            assert_eq!(probe_with_kill(pid), Probe::Gone);
            assert_eq!(table.probe(pid), Probe::Gone);
            assert_eq!(
                table.request_termination(pid, TerminationSignal::Term),
                Termination::AlreadyExited
            );
        }
    }

    #[tokio::test]
    async fn test_spawn_empty_argv() {
        let result = spawn_child(&SpawnRequest::default());
        match result {
            Err(CoreError::ValidationError(_)) => {}
            other => panic!("Expected ValidationError, got: {:?}", other.map(|c| c.id())),
        }
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result = spawn_child(&SpawnRequest::new(["nonexistent_command_12345"]));
        match result {
            Err(CoreError::SpawnFailure(_)) => {}
            other => panic!("Expected SpawnFailure, got: {:?}", other.map(|c| c.id())),
        }
    }
}
