//! Process handles and their backing registry entries
//!
//! A [`ProcessHandle`] is a cheap, clonable value naming one process instance:
//! its pid plus, where the platform exposes it, its start time. Handles
//! compare by value, so a handle returned by spawn equals one re-derived later
//! from the same pid.
//!
//! Each handle holds a strong reference to its [`ProcessEntry`], which owns
//! the completion cell. Once the process has exited the outcome stays cached
//! there for as long as any handle or completion future is alive.

use crate::completion::CompletionCell;
use crate::process::start_times_compatible;
use schema::ExitRecord;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registry bookkeeping for one process instance
pub(crate) struct ProcessEntry {
    pub(crate) pid: u32,
    pub(crate) start_time: Option<u64>,
    pub(crate) completion: CompletionCell,
    tracked_child: AtomicBool,
    watcher_started: AtomicBool,
}

impl ProcessEntry {
    pub(crate) fn new(
        pid: u32,
        start_time: Option<u64>,
        tracked_child: bool,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            start_time,
            completion: CompletionCell::new(pid, runtime),
            tracked_child: AtomicBool::new(tracked_child),
            watcher_started: AtomicBool::new(false),
        })
    }

    /// Claim the right to start this entry's exit watcher; true at most once
    pub(crate) fn claim_watcher(&self) -> bool {
        self.watcher_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a reaper owns this process's exit
    pub(crate) fn is_tracked(&self) -> bool {
        self.tracked_child.load(Ordering::Acquire)
    }

    /// Hand the exit over to a reaper; poll watchers stand down once set
    pub(crate) fn mark_tracked(&self) {
        self.tracked_child.store(true, Ordering::Release);
    }

    pub(crate) fn is_watched(&self) -> bool {
        self.watcher_started.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.completion.is_done()
    }
}

impl fmt::Debug for ProcessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessEntry")
            .field("pid", &self.pid)
            .field("start_time", &self.start_time)
            .field("tracked_child", &self.is_tracked())
            .field("watched", &self.is_watched())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Value identifying a specific OS process instance
#[derive(Clone)]
pub struct ProcessHandle {
    entry: Arc<ProcessEntry>,
}

impl ProcessHandle {
    pub(crate) fn from_entry(entry: Arc<ProcessEntry>) -> Self {
        Self { entry }
    }

    pub(crate) fn entry(&self) -> &Arc<ProcessEntry> {
        &self.entry
    }

    /// The process ID
    pub fn pid(&self) -> u32 {
        self.entry.pid
    }

    /// Start time in clock ticks since boot, when the platform exposes it
    pub fn start_time(&self) -> Option<u64> {
        self.entry.start_time
    }

    /// Whether the process was spawned through the registry and is reaped by it
    pub fn is_tracked_child(&self) -> bool {
        self.entry.is_tracked()
    }

    /// Whether this handle names the calling process
    pub fn is_current(&self) -> bool {
        self.entry.pid == std::process::id()
    }

    /// The cached exit record, once the process's exit has been observed
    pub fn exit_record(&self) -> Option<ExitRecord> {
        self.entry.completion.peek().and_then(Result::ok)
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
            || (self.entry.pid == other.entry.pid
                && start_times_compatible(self.entry.start_time, other.entry.start_time))
    }
}

impl Eq for ProcessHandle {}

impl Hash for ProcessHandle {
    // Start time is left out so hashing agrees with equality when one side lacks it
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.pid.hash(state);
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.entry.pid)
            .field("start_time", &self.entry.start_time)
            .field("tracked_child", &self.entry.is_tracked())
            .finish()
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle(pid: u32, start_time: Option<u64>) -> ProcessHandle {
        ProcessHandle::from_entry(ProcessEntry::new(
            pid,
            start_time,
            false,
            tokio::runtime::Handle::current(),
        ))
    }

    #[tokio::test]
    async fn test_value_equality() {
        let a = handle(100, Some(5));
        let b = handle(100, Some(5));
        let reused = handle(100, Some(9));
        let unknown = handle(100, None);

        assert_eq!(a, b);
        assert_ne!(a, reused);
        assert_eq!(a, unknown);
        assert_ne!(a, handle(101, Some(5)));

        let set: HashSet<_> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
    }

    #[tokio::test]
    async fn test_watcher_claimed_once() {
        let h = handle(200, Some(1));
        assert!(!h.entry().is_watched());
        assert!(h.entry().claim_watcher());
        assert!(!h.entry().claim_watcher());
        assert!(h.entry().is_watched());

        assert!(!h.is_tracked_child());
        h.entry().mark_tracked();
        assert!(h.is_tracked_child());
    }

    #[tokio::test]
    async fn test_display_and_current() {
        let h = handle(4321, None);
        assert_eq!(h.to_string(), "4321");
        assert!(!h.is_current());
        assert!(handle(std::process::id(), None).is_current());
        assert!(h.exit_record().is_none());
    }
}
