//! Process tree enumeration
//!
//! Children and descendants are derived from parent-pid links in a single
//! scan of the process table. The result is a snapshot: a child that exits
//! mid-walk is simply missing, and a grandchild forked after the scan is not
//! seen. Callers that need a settled tree poll until the count stabilizes.
//!
//! A walk only starts from a root whose own row in the scan is the handle's
//! process instance. A handle whose pid has since been reused has no children,
//! whatever the new occupant of the pid has forked.

use crate::handle::ProcessHandle;
use crate::process::{start_times_compatible, ProcessStat};
use crate::registry::ProcessRegistry;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Walks parent/child relationships of processes in one registry
#[derive(Debug, Clone, Copy)]
pub struct ProcessTreeWalker<'a> {
    registry: &'a ProcessRegistry,
}

impl<'a> ProcessTreeWalker<'a> {
    /// Create a walker over the registry's process table
    pub fn new(registry: &'a ProcessRegistry) -> Self {
        Self { registry }
    }

    /// Direct children of a process, sorted by pid
    pub fn children(&self, handle: &ProcessHandle) -> Vec<ProcessHandle> {
        if !self.registry.is_alive(handle) {
            return Vec::new();
        }
        let links = ChildLinks::scan(self.registry);
        if !links.is_instance(handle) {
            return Vec::new();
        }
        links
            .children_of(handle.pid(), handle.start_time())
            .map(|stat| self.registry.intern(stat.pid, stat.start_time))
            .collect()
    }

    /// Every process below this one, depth-first with children in pid order
    pub fn descendants(&self, handle: &ProcessHandle) -> Vec<ProcessHandle> {
        if !self.registry.is_alive(handle) {
            debug!("Process {} has exited; no descendants", handle.pid());
            return Vec::new();
        }
        let links = ChildLinks::scan(self.registry);
        if !links.is_instance(handle) {
            debug!("Process {} is not in the scan as this instance", handle.pid());
            return Vec::new();
        }
        let mut visited = HashSet::from([handle.pid()]);
        let mut result = Vec::new();

        // Stack holds children in reverse so the lowest pid is visited first
        let mut stack: Vec<ProcessStat> = links
            .children_of(handle.pid(), handle.start_time())
            .rev()
            .collect();
        while let Some(stat) = stack.pop() {
            if !visited.insert(stat.pid) {
                continue;
            }
            result.push(self.registry.intern(stat.pid, stat.start_time));
            stack.extend(links.children_of(stat.pid, stat.start_time).rev());
        }

        debug!("Process {} has {} descendants", handle.pid(), result.len());
        result
    }

    /// Parent of a process, if it is still running and has a live parent
    pub fn parent(&self, handle: &ProcessHandle) -> Option<ProcessHandle> {
        if !self.registry.is_alive(handle) {
            return None;
        }
        let ppid = self.registry.table().query_parent(handle.pid())?;
        self.registry.handle_for(ppid).ok()
    }
}

/// Parent pid → child rows from one table scan
struct ChildLinks {
    by_parent: BTreeMap<u32, Vec<ProcessStat>>,
    live: HashMap<u32, Option<u64>>,
}

impl ChildLinks {
    fn scan(registry: &ProcessRegistry) -> Self {
        let mut by_parent: BTreeMap<u32, Vec<ProcessStat>> = BTreeMap::new();
        let mut live = HashMap::new();
        for stat in registry.table().snapshot() {
            if stat.zombie {
                continue;
            }
            live.insert(stat.pid, stat.start_time);
            if stat.pid != stat.ppid {
                by_parent.entry(stat.ppid).or_default().push(stat);
            }
        }
        for children in by_parent.values_mut() {
            children.sort_by_key(|stat| stat.pid);
        }
        Self { by_parent, live }
    }

    /// Whether the scan holds a running row that is the handle's own process
    fn is_instance(&self, handle: &ProcessHandle) -> bool {
        self.live
            .get(&handle.pid())
            .is_some_and(|&start| start_times_compatible(start, handle.start_time()))
    }

    /// Children of `pid`, skipping any that started before the parent did
    fn children_of(
        &self,
        pid: u32,
        parent_start: Option<u64>,
    ) -> impl DoubleEndedIterator<Item = ProcessStat> + '_ {
        self.by_parent
            .get(&pid)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(move |stat| started_after(stat.start_time, parent_start))
    }
}

fn started_after(child: Option<u64>, parent: Option<u64>) -> bool {
    match (child, parent) {
        (Some(child), Some(parent)) => child >= parent,
        _ => start_times_compatible(child, parent),
    }
}
