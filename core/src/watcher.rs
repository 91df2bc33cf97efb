//! Exit watchers
//!
//! One watcher task per process, in one of two flavours:
//!
//! - **Reap**: for tracked children. The task owns the `tokio::process::Child`
//!   and awaits its exit, which also reaps it. Started at spawn time, so the
//!   status is collected exactly once whether or not anyone is listening.
//! - **Poll**: for every other process. No wait primitive exists for
//!   processes we did not spawn, so the task sleeps between liveness probes
//!   with exponential backoff until the process is gone, a zombie, or
//!   replaced by a different process under the same pid.
//!
//! Either way the watcher ends by fulfilling the entry's completion cell.
//!
//! A lookup can intern a freshly spawned child before the spawn has
//! registered it. When that entry already has a poll watcher, the reaper
//! still starts and the poller stands down on its next round, so the
//! delivered record is always the reaped one.

use crate::completion::RawOutcome;
use crate::error::WatchError;
use crate::handle::ProcessEntry;
use crate::process::Probe;
use crate::registry::ProcessRegistry;
use schema::{ExitRecord, ProcessEvent, WatchStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exponential delay sequence for liveness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollBackoff {
    next: Duration,
    max: Duration,
}

impl PollBackoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            next: initial,
            max: max.max(initial),
        }
    }

    /// Delay to sleep now; doubles for the next call up to the cap
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// Monitor that turns a process's termination into a fulfilled completion
pub(crate) struct ExitWatcher {
    registry: ProcessRegistry,
    entry: Arc<ProcessEntry>,
}

impl ExitWatcher {
    /// Start reaping a tracked child.
    ///
    /// The child must be reaped whatever else watches it, so this always
    /// starts; a poll watcher already on the entry gives way.
    pub(crate) fn reap(registry: ProcessRegistry, entry: Arc<ProcessEntry>, child: Child) -> JoinHandle<()> {
        entry.mark_tracked();
        if !entry.claim_watcher() {
            debug!("Process {} was being polled; reaper takes over", entry.pid);
        }
        registry.emit(ProcessEvent::watch_started(entry.pid, WatchStrategy::Reap));
        let runtime = registry.runtime().clone();
        let watcher = Self { registry, entry };
        runtime.spawn(watcher.run_reap(child))
    }

    /// Start polling an arbitrary process, unless a watcher already runs for it
    pub(crate) fn poll(registry: ProcessRegistry, entry: Arc<ProcessEntry>) -> Option<JoinHandle<()>> {
        if entry.is_terminated() || entry.is_tracked() || !entry.claim_watcher() {
            return None;
        }
        registry.emit(ProcessEvent::watch_started(entry.pid, WatchStrategy::Poll));
        let runtime = registry.runtime().clone();
        let watcher = Self { registry, entry };
        Some(runtime.spawn(watcher.run_poll()))
    }

    async fn run_reap(self, mut child: Child) {
        let pid = self.entry.pid;
        debug!("Reaping tracked child {}", pid);

        let outcome = match child.wait().await {
            Ok(status) => Ok(exit_record_from_status(pid, status)),
            Err(e) => Err(WatchError::WaitFailed {
                pid,
                message: e.to_string(),
            }),
        };
        self.finish(outcome);
    }

    async fn run_poll(self) {
        let pid = self.entry.pid;
        let config = self.registry.config();
        let mut backoff = PollBackoff::new(config.poll_initial_interval(), config.poll_max_interval());
        debug!("Polling process {} for exit", pid);

        let own_pid = std::process::id();
        let mut zombie_grace = true;

        loop {
            if self.entry.is_tracked() {
                debug!("Process {} is reaped by its spawner; poller stands down", pid);
                return;
            }
            match self.registry.table().probe(pid) {
                probe @ Probe::Running { .. } if probe.is_running_instance(self.entry.start_time) => {}
                Probe::AccessDenied => {
                    self.finish(Err(WatchError::AccessDenied { pid }));
                    return;
                }
                // An unreaped child of ours may be a spawn still registering
                Probe::Zombie { .. }
                    if zombie_grace && self.registry.table().query_parent(pid) == Some(own_pid) =>
                {
                    zombie_grace = false;
                }
                _ if self.entry.is_tracked() => return,
                _ => {
                    let record = match self.registry.table().query_exit_code(pid) {
                        Some(code) => ExitRecord::exited(pid, code),
                        None => ExitRecord::unknown(pid),
                    };
                    self.finish(Ok(record));
                    return;
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    fn finish(&self, outcome: RawOutcome) {
        let pid = self.entry.pid;
        let event = match &outcome {
            Ok(record) => {
                info!(
                    "Process {} exited: exit_code={:?}, signal={:?}",
                    pid, record.exit_code, record.signal
                );
                ProcessEvent::completion_delivered(record.clone())
            }
            Err(e) => {
                warn!("Exit watch for process {} failed: {}", pid, e);
                ProcessEvent::watch_failed(pid, e.to_string())
            }
        };

        if self.entry.completion.fulfill(outcome) {
            self.registry.emit(event);
        } else {
            debug!("Completion for process {} was already fulfilled", pid);
        }
    }
}

#[cfg(unix)]
fn exit_record_from_status(pid: u32, status: std::process::ExitStatus) -> ExitRecord {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitRecord::exited(pid, code),
        (None, Some(signal)) => ExitRecord::signaled(pid, signal),
        (None, None) => ExitRecord::unknown(pid),
    }
}

#[cfg(not(unix))]
fn exit_record_from_status(pid: u32, status: std::process::ExitStatus) -> ExitRecord {
    status
        .code()
        .map_or_else(|| ExitRecord::unknown(pid), |code| ExitRecord::exited(pid, code))
}
