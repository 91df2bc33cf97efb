//! Process registry
//!
//! The registry is the one place that maps pids to handles. It is built
//! explicitly, once per process lifetime, and passed by reference to the
//! collaborators that need it ([`ProcessTreeWalker`], [`TreeDestroyer`]).
//!
//! ## Deduplication
//!
//! Lookups insert-if-absent into a sharded map keyed by pid, so concurrent
//! lookups for unrelated processes never serialize on one lock, and two
//! lookups of the same live process yield handles sharing one entry (and so
//! one completion and one watcher).
//!
//! The map only stores weak references. An entry lives as long as a handle,
//! a completion future, or its running watcher holds it; after that the slot
//! is dead and gets replaced or pruned.
//!
//! [`ProcessTreeWalker`]: crate::tree::ProcessTreeWalker
//! [`TreeDestroyer`]: crate::destroy::TreeDestroyer

use crate::handle::{ProcessEntry, ProcessHandle};
use crate::process::{Probe, ProcessTable, SpawnRequest};
use crate::{CoreError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use schema::{EngineConfig, ProcessEvent};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info};

struct RegistryInner {
    table: Arc<dyn ProcessTable>,
    config: EngineConfig,
    entries: DashMap<u32, Weak<ProcessEntry>>,
    event_tx: broadcast::Sender<ProcessEvent>,
    runtime: tokio::runtime::Handle,
    current: ProcessHandle,
}

/// Authoritative pid → handle mapping for one engine instance
#[derive(Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

impl ProcessRegistry {
    /// Create a registry over the given process table.
    ///
    /// Must be called from within a tokio runtime; the runtime is captured
    /// and used for watchers and continuation dispatch.
    pub fn new(table: Arc<dyn ProcessTable>, config: EngineConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CoreError::InitializationError(format!("process registry needs a tokio runtime: {}", e))
        })?;
        let (event_tx, _event_rx) = broadcast::channel(config.event_channel_capacity.max(1));

        let pid = std::process::id();
        let start_time = table.probe(pid).start_time();
        let current = ProcessHandle::from_entry(ProcessEntry::new(
            pid,
            start_time,
            false,
            runtime.clone(),
        ));

        let entries = DashMap::new();
        entries.insert(pid, Arc::downgrade(current.entry()));

        info!("Process registry initialized for pid {}", pid);

        Ok(Self {
            inner: Arc::new(RegistryInner {
                table,
                config,
                entries,
                event_tx,
                runtime,
                current,
            }),
        })
    }

    /// Create a registry over the real Unix process table
    #[cfg(unix)]
    pub fn unix(config: EngineConfig) -> Result<Self> {
        Self::new(Arc::new(crate::process::UnixProcessTable::new()), config)
    }

    /// Handle for a live process, or `NoSuchProcess`.
    ///
    /// The check against the OS is best-effort: the process may exit right
    /// after this returns.
    pub fn handle_for(&self, pid: u32) -> Result<ProcessHandle> {
        // 0 and negative pids name process groups for kill(2)
        if pid == 0 || i32::try_from(pid).is_err() {
            return Err(CoreError::ValidationError(format!(
                "pid {} does not name a single process",
                pid
            )));
        }
        if pid == std::process::id() {
            return Ok(self.current());
        }
        match self.inner.table.probe(pid) {
            Probe::Running { start_time } => Ok(self.intern(pid, start_time)),
            // The process exists but its start time is unreadable
            Probe::AccessDenied => Ok(self.intern(pid, None)),
            Probe::Zombie { .. } | Probe::Gone => Err(CoreError::NoSuchProcess(pid)),
        }
    }

    /// Handle for the calling process
    pub fn current(&self) -> ProcessHandle {
        self.inner.current.clone()
    }

    /// Whether the handle's process is still running.
    ///
    /// Once the handle's exit has been delivered this is `false` forever;
    /// until then the OS is asked on every call.
    pub fn is_alive(&self, handle: &ProcessHandle) -> bool {
        if handle.entry().is_terminated() {
            return false;
        }
        if handle.is_current() {
            return true;
        }
        match self.inner.table.probe(handle.pid()) {
            probe @ Probe::Running { .. } => probe.is_running_instance(handle.start_time()),
            Probe::AccessDenied => true,
            Probe::Zombie { .. } | Probe::Gone => false,
        }
    }

    /// Spawn a tracked child and start reaping it.
    ///
    /// The child's exit status is collected by a dedicated watcher task from
    /// the moment it starts, whether or not anyone asks for it.
    #[cfg(unix)]
    pub fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle> {
        let child = crate::process::unix::spawn_child(request)?;
        let pid = child
            .id()
            .ok_or_else(|| CoreError::SpawnFailure("Spawned child did not have a PID".to_string()))?;
        let start_time = self.inner.table.probe(pid).start_time();

        let entry = self.register_tracked(pid, start_time);
        debug!("Spawned tracked child {} ({:?})", pid, request.argv);

        crate::watcher::ExitWatcher::reap(self.clone(), Arc::clone(&entry), child);
        Ok(ProcessHandle::from_entry(entry))
    }

    /// Subscribe to diagnostic events
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Engine configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of entries still referenced by a handle, future or watcher
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|slot| slot.value().strong_count() > 0)
            .count()
    }

    /// Whether no entry is referenced any more
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop map slots whose entries have been freed
    pub fn prune(&self) {
        self.inner
            .entries
            .retain(|_, entry| entry.strong_count() > 0);
    }

    pub(crate) fn table(&self) -> &dyn ProcessTable {
        self.inner.table.as_ref()
    }

    pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
        &self.inner.runtime
    }

    pub(crate) fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }

    /// Handle for a process observed at `start_time`, reusing the live entry
    /// for the same instance when there is one
    pub(crate) fn intern(&self, pid: u32, start_time: Option<u64>) -> ProcessHandle {
        ProcessHandle::from_entry(self.slot(pid, start_time, false))
    }

    /// Entry for a just-spawned child.
    ///
    /// A lookup racing with the spawn may already have interned the child;
    /// that entry is adopted and handed to the reaper so every handle shares
    /// one completion.
    pub(crate) fn register_tracked(&self, pid: u32, start_time: Option<u64>) -> Arc<ProcessEntry> {
        let entry = self.slot(pid, start_time, true);
        entry.mark_tracked();
        entry
    }

    fn slot(&self, pid: u32, start_time: Option<u64>, tracked_child: bool) -> Arc<ProcessEntry> {
        let (entry, created) = match self.inner.entries.entry(pid) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(existing) if Self::same_instance(&existing, start_time) => (existing, false),
                _ => {
                    let entry = self.new_entry(pid, start_time, tracked_child);
                    slot.insert(Arc::downgrade(&entry));
                    (entry, true)
                }
            },
            Entry::Vacant(slot) => {
                let entry = self.new_entry(pid, start_time, tracked_child);
                slot.insert(Arc::downgrade(&entry));
                (entry, true)
            }
        };

        if created {
            debug!("Observed process {} (start time {:?})", pid, start_time);
            self.emit(ProcessEvent::process_observed(pid, start_time, tracked_child));
        }
        entry
    }

    fn new_entry(&self, pid: u32, start_time: Option<u64>, tracked_child: bool) -> Arc<ProcessEntry> {
        ProcessEntry::new(pid, start_time, tracked_child, self.inner.runtime.clone())
    }

    fn same_instance(existing: &ProcessEntry, start_time: Option<u64>) -> bool {
        match (existing.start_time, start_time) {
            (Some(a), Some(b)) => a == b,
            // Without start times an exited entry cannot be told apart from a reused pid
            _ => !existing.is_terminated(),
        }
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("table", &self.inner.table)
            .field("entries", &self.inner.entries.len())
            .field("current", &self.inner.current)
            .finish()
    }
}
