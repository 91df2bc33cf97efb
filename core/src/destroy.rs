//! Process termination
//!
//! Single-process termination requests live on [`ProcessRegistry`]; whole
//! trees are handled by [`TreeDestroyer`], which snapshots descendants,
//! signals every member and then waits for each exit under one deadline.
//! A failure for one member is recorded and never stops the others.

use crate::completion::ProcessExit;
use crate::error::WatchError;
use crate::handle::ProcessHandle;
use crate::notifier::wait_all;
use crate::process::Probe;
use crate::registry::ProcessRegistry;
use crate::tree::ProcessTreeWalker;
use crate::{CoreError, Result};
use schema::{DestroyStatus, ProcessEvent, Termination, TerminationSignal};
use std::time::Duration;
use tracing::{debug, info, warn};

impl ProcessRegistry {
    /// Ask the handle's process to terminate with the given signal.
    ///
    /// Returns `AlreadyExited` when the process is gone or the pid now
    /// belongs to another process. The calling process is never signalled.
    pub fn terminate(&self, handle: &ProcessHandle, signal: TerminationSignal) -> Result<Termination> {
        if handle.is_current() {
            return Err(CoreError::ValidationError(
                "Refusing to terminate the current process".to_string(),
            ));
        }

        let pid = handle.pid();
        let outcome = if handle.entry().is_terminated() {
            Termination::AlreadyExited
        } else {
            match self.table().probe(pid) {
                probe @ Probe::Running { .. } if probe.is_running_instance(handle.start_time()) => {
                    self.table().request_termination(pid, signal)
                }
                Probe::AccessDenied => self.table().request_termination(pid, signal),
                _ => Termination::AlreadyExited,
            }
        };

        debug!("Termination of process {} with {:?}: {:?}", pid, signal, outcome);
        self.emit(ProcessEvent::termination_requested(pid, outcome));
        match outcome {
            Termination::AccessDenied => Err(CoreError::AccessDenied(format!(
                "Not permitted to signal process {}",
                pid
            ))),
            other => Ok(other),
        }
    }

    /// Request graceful termination (`SIGTERM`)
    pub fn destroy(&self, handle: &ProcessHandle) -> Result<Termination> {
        self.terminate(handle, TerminationSignal::Term)
    }

    /// Request forceful termination (`SIGKILL`)
    pub fn destroy_forcibly(&self, handle: &ProcessHandle) -> Result<Termination> {
        self.terminate(handle, TerminationSignal::Kill)
    }
}

/// What became of one process during a tree destroy
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The exit was observed
    Terminated(ProcessExit),
    /// The process could not be watched
    WatchFailed(WatchError),
    /// Still running when the deadline passed
    StillLive,
}

impl ProcessOutcome {
    /// Whether the process is known to have exited
    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessOutcome::Terminated(_))
    }
}

/// Result of destroying a process tree
#[derive(Debug, Clone)]
pub struct DestroyReport {
    /// Root of the destroyed tree
    pub root: ProcessHandle,
    /// Termination request result for each process signalled, root first
    pub requests: Vec<(ProcessHandle, Termination)>,
    /// Final state of each process waited on, root first
    pub outcomes: Vec<(ProcessHandle, ProcessOutcome)>,
    /// Overall status
    pub status: DestroyStatus,
}

impl DestroyReport {
    /// Whether every waited-on process was accounted for before the deadline
    pub fn all_exited(&self) -> bool {
        self.status == DestroyStatus::AllExited
    }

    /// Processes still running at the deadline
    pub fn still_live(&self) -> Vec<&ProcessHandle> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == ProcessOutcome::StillLive)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Outcome recorded for one process
    pub fn outcome_for(&self, handle: &ProcessHandle) -> Option<&ProcessOutcome> {
        self.outcomes
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, termination: Termination) -> usize {
        self.requests.iter().filter(|(_, t)| *t == termination).count()
    }
}

/// Best-effort termination of a process and all of its descendants
#[derive(Debug, Clone, Copy)]
pub struct TreeDestroyer<'a> {
    registry: &'a ProcessRegistry,
}

impl<'a> TreeDestroyer<'a> {
    /// Create a destroyer acting through the given registry
    pub fn new(registry: &'a ProcessRegistry) -> Self {
        Self { registry }
    }

    /// Destroy the tree, waiting up to the configured destroy timeout
    pub async fn destroy_tree(&self, root: &ProcessHandle) -> DestroyReport {
        self.destroy_tree_with_timeout(root, self.registry.config().destroy_timeout())
            .await
    }

    /// Destroy the tree, waiting up to `timeout` for every exit.
    ///
    /// Descendants are taken from a snapshot before any signal is sent. When
    /// `root` is the calling process only its descendants are destroyed.
    pub async fn destroy_tree_with_timeout(
        &self,
        root: &ProcessHandle,
        timeout: Duration,
    ) -> DestroyReport {
        let signal = self.registry.config().destroy_signal;
        let descendants = ProcessTreeWalker::new(self.registry).descendants(root);
        info!(
            "Destroying process tree {} ({} descendants) with {:?}",
            root.pid(),
            descendants.len(),
            signal
        );

        let mut members = Vec::with_capacity(descendants.len() + 1);
        if !root.is_current() {
            members.push(root.clone());
        }
        members.extend(descendants);

        let mut requests = Vec::with_capacity(members.len());
        for member in &members {
            let termination = match self.registry.terminate(member, signal) {
                Ok(termination) => termination,
                Err(CoreError::AccessDenied(message)) => {
                    warn!("{}", message);
                    Termination::AccessDenied
                }
                Err(e) => {
                    warn!("Could not terminate process {}: {}", member.pid(), e);
                    continue;
                }
            };
            requests.push((member.clone(), termination));
        }

        let futures: Vec<_> = members.iter().map(|m| self.registry.on_exit(m)).collect();
        let collected = wait_all(futures, timeout).await;

        let outcomes: Vec<(ProcessHandle, ProcessOutcome)> = members
            .into_iter()
            .map(|member| {
                let outcome = match collected.outcome_for(&member) {
                    Some(Ok(exit)) => ProcessOutcome::Terminated(exit.clone()),
                    Some(Err(e)) => ProcessOutcome::WatchFailed(e.clone()),
                    None => ProcessOutcome::StillLive,
                };
                (member, outcome)
            })
            .collect();

        let still_live = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == ProcessOutcome::StillLive)
            .count();
        let status = if still_live == 0 {
            DestroyStatus::AllExited
        } else {
            warn!(
                "Process tree {} destroy timed out with {} processes still live",
                root.pid(),
                still_live
            );
            DestroyStatus::TimedOut { still_live }
        };

        let report = DestroyReport {
            root: root.clone(),
            requests,
            outcomes,
            status,
        };
        self.registry.emit(ProcessEvent::destroy_outcome(
            root.pid(),
            report.count(Termination::Requested),
            report.count(Termination::AccessDenied),
            status,
        ));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcessTable;
    use schema::EngineConfig;
    use std::sync::Arc;

    fn registry(table: &Arc<MockProcessTable>) -> Result<ProcessRegistry> {
        ProcessRegistry::new(
            table.clone(),
            EngineConfig {
                poll_initial_interval_ms: 5,
                poll_max_interval_ms: 20,
                ..EngineConfig::default()
            },
        )
    }

    fn small_tree(table: &MockProcessTable) {
        table.add(500, 1, 10);
        table.add(510, 500, 11);
        table.add(511, 510, 12);
        table.add(520, 500, 11);
    }

    #[tokio::test]
    async fn test_terminate_twice_reports_already_exited() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        table.add(400, 1, 10);
        let registry = registry(&table)?;
        let handle = registry.handle_for(400)?;

        assert_eq!(registry.destroy(&handle)?, Termination::Requested);
        assert_eq!(registry.destroy(&handle)?, Termination::AlreadyExited);
        assert_eq!(registry.destroy_forcibly(&handle)?, Termination::AlreadyExited);
        assert_eq!(table.terminations(), vec![(400, TerminationSignal::Term)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_terminate_reused_pid_is_already_exited() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        table.add(401, 1, 10);
        let registry = registry(&table)?;
        let handle = registry.handle_for(401)?;

        table.reuse(401, 1, 99);
        assert_eq!(registry.destroy_forcibly(&handle)?, Termination::AlreadyExited);
        assert!(table.is_running(401));
        Ok(())
    }

    #[tokio::test]
    async fn test_terminate_access_denied() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        table.add_restricted(402, 1);
        let registry = registry(&table)?;
        let handle = registry.handle_for(402)?;

        let err = registry.destroy(&handle).unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied(_)));
        assert_eq!(err.code(), "PROC002");
        Ok(())
    }

    #[tokio::test]
    async fn test_terminate_current_refused() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        let registry = registry(&table)?;

        let err = registry.destroy_forcibly(&registry.current()).unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(table.terminations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_tree_all_exited() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        small_tree(&table);
        let registry = registry(&table)?;
        let mut events = registry.subscribe();
        let root = registry.handle_for(500)?;

        let report = TreeDestroyer::new(&registry)
            .destroy_tree_with_timeout(&root, Duration::from_secs(2))
            .await;

        assert!(report.all_exited());
        assert_eq!(report.requests.len(), 4);
        assert_eq!(report.requests[0].0, root);
        for (handle, outcome) in &report.outcomes {
            match outcome {
                ProcessOutcome::Terminated(exit) => {
                    assert_eq!(&exit.handle, handle);
                    assert_eq!(exit.record.exit_code, Some(137));
                }
                other => panic!("unexpected outcome {:?}", other),
            }
            assert!(!registry.is_alive(handle));
        }

        let mut saw_outcome = false;
        while let Ok(event) = events.try_recv() {
            if let ProcessEvent::DestroyOutcome {
                root_pid,
                requested,
                status,
                ..
            } = event
            {
                assert_eq!(root_pid, 500);
                assert_eq!(requested, 4);
                assert_eq!(status, DestroyStatus::AllExited);
                saw_outcome = true;
            }
        }
        assert!(saw_outcome);
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_tree_times_out_on_stubborn_process() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        small_tree(&table);
        table.add_stubborn(521, 520, 13);
        let registry = registry(&table)?;
        let root = registry.handle_for(500)?;
        let stubborn = registry.handle_for(521)?;

        let report = TreeDestroyer::new(&registry)
            .destroy_tree_with_timeout(&root, Duration::from_millis(200))
            .await;

        assert_eq!(report.status, DestroyStatus::TimedOut { still_live: 1 });
        assert_eq!(report.still_live(), vec![&stubborn]);
        assert!(report.outcome_for(&root).is_some_and(ProcessOutcome::is_terminated));
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_tree_records_access_denied() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        table.add_restricted(530, 1);
        let registry = registry(&table)?;
        let root = registry.handle_for(530)?;

        let report = TreeDestroyer::new(&registry)
            .destroy_tree_with_timeout(&root, Duration::from_secs(2))
            .await;

        assert_eq!(report.requests, vec![(root.clone(), Termination::AccessDenied)]);
        assert_eq!(
            report.outcome_for(&root),
            Some(&ProcessOutcome::WatchFailed(WatchError::AccessDenied { pid: 530 }))
        );
        assert!(report.still_live().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_tree_of_reused_pid_spares_new_occupant() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        table.add(200, 1, 500);
        let registry = registry(&table)?;
        let old = registry.handle_for(200)?;

        table.reuse(200, 1, 900);
        table.add(250, 200, 950);

        let report = TreeDestroyer::new(&registry)
            .destroy_tree_with_timeout(&old, Duration::from_secs(1))
            .await;

        assert_eq!(report.requests, vec![(old.clone(), Termination::AlreadyExited)]);
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.all_exited());
        assert!(table.terminations().is_empty());
        assert!(table.is_running(200));
        assert!(table.is_running(250));
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_tree_of_current_spares_caller() -> Result<()> {
        let table = Arc::new(MockProcessTable::new());
        let own = std::process::id();
        table.add(own, 1, 10);
        table.add(4_000_001, own, 11);
        let registry = registry(&table)?;

        let report = TreeDestroyer::new(&registry)
            .destroy_tree_with_timeout(&registry.current(), Duration::from_secs(2))
            .await;

        assert!(report.all_exited());
        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].0.pid(), 4_000_001);
        assert!(table.is_running(own));
        Ok(())
    }
}
