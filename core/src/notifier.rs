//! Exit notification
//!
//! [`ProcessRegistry::on_exit`] hands out completion futures. Every future for
//! the same process instance is backed by the same completion cell and the
//! same single watcher; asking twice never starts a second watcher or reaps
//! twice. Dropping futures does not stop the watcher.
//!
//! [`wait_all`] waits on many futures at once under one deadline. Each
//! process's outcome is collected on its own; a failed watch never hides the
//! others, and processes still running at the deadline are reported back
//! rather than dropped.

use crate::completion::{CompletionFuture, ExitOutcome};
use crate::handle::ProcessHandle;
use crate::registry::ProcessRegistry;
use crate::watcher::ExitWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

impl ProcessRegistry {
    /// Completion that fulfills once when the handle's process exits.
    ///
    /// Tracked children are already being reaped; any other process gets a
    /// polling watcher on first request. The calling process never exits
    /// from its own point of view, so its completion stays pending.
    pub fn on_exit(&self, handle: &ProcessHandle) -> CompletionFuture {
        if handle.is_current() {
            debug!("Exit of the current process cannot be observed from inside it");
        } else if ExitWatcher::poll(self.clone(), Arc::clone(handle.entry())).is_some() {
            debug!("Started exit watcher for process {}", handle.pid());
        }
        CompletionFuture::new(handle.clone())
    }
}

/// Outcomes gathered by [`wait_all`]
#[derive(Debug, Clone, Default)]
pub struct CollectedExits {
    /// Processes whose completion fulfilled before the deadline
    pub completed: Vec<(ProcessHandle, ExitOutcome)>,
    /// Processes still pending at the deadline
    pub pending: Vec<ProcessHandle>,
}

impl CollectedExits {
    /// Whether every completion fulfilled in time
    pub fn all_completed(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outcome for one process, if it completed
    pub fn outcome_for(&self, handle: &ProcessHandle) -> Option<&ExitOutcome> {
        self.completed
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, outcome)| outcome)
    }
}

/// Wait for many completions concurrently with one overall timeout
pub async fn wait_all<I>(futures: I, timeout: Duration) -> CollectedExits
where
    I: IntoIterator<Item = CompletionFuture>,
{
    let deadline = Instant::now() + timeout;
    let futures: Vec<CompletionFuture> = futures.into_iter().collect();
    let mut slots: Vec<Option<ExitOutcome>> = vec![None; futures.len()];

    let mut set = JoinSet::new();
    for (index, future) in futures.iter().cloned().enumerate() {
        set.spawn(async move {
            let outcome = tokio::time::timeout_at(deadline, future.wait()).await.ok();
            (index, outcome)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = outcome,
            Err(e) => warn!("Exit collection task failed: {}", e),
        }
    }

    let mut collected = CollectedExits::default();
    for (future, slot) in futures.into_iter().zip(slots) {
        let handle = future.handle().clone();
        match slot {
            Some(outcome) => collected.completed.push((handle, outcome)),
            None => collected.pending.push(handle),
        }
    }
    collected
}
