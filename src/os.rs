//! Thin seams over the operating system: process control and top-level
//! window state. The orchestrator only talks to these traits, so the run
//! logic can be exercised against the in-memory fake in tests.

#[cfg(test)]
pub(crate) mod fake;
#[cfg(not(windows))]
mod headless;
mod system;
#[cfg(windows)]
mod win32;

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    path::Path,
    sync::Arc,
};

use anyhow::Result;

use crate::error::LaunchError;

/// Upper bound on the size of a resolved process tree.
const MAX_TREE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub trait ProcessApi: Send + Sync {
    /// Start `path` with `arguments` passed through as given.
    fn start(&self, path: &Path, arguments: &str) -> Result<ProcessId, LaunchError>;

    fn exists(&self, pid: ProcessId) -> bool;

    fn terminate(&self, pid: ProcessId, forceful: bool) -> Result<()>;

    /// Direct children of `pid`.
    fn child_processes(&self, pid: ProcessId) -> Vec<ProcessId>;

    /// Processes already running from the same executable.
    fn instances_of(&self, _path: &Path) -> Vec<ProcessId> {
        Vec::new()
    }
}

pub trait WindowApi: Send + Sync {
    /// Top-level windows whose owning process is one of `pids`.
    fn windows_owned_by(&self, pids: &[ProcessId]) -> Vec<WindowId>;

    fn is_visible(&self, window: WindowId) -> bool;

    fn is_minimized(&self, window: WindowId) -> bool;

    fn minimize(&self, window: WindowId) -> Result<()>;

    fn title(&self, _window: WindowId) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct Platform {
    pub processes: Arc<dyn ProcessApi>,
    pub windows: Arc<dyn WindowApi>,
}

impl Platform {
    pub fn new(processes: Arc<dyn ProcessApi>, windows: Arc<dyn WindowApi>) -> Self {
        Self { processes, windows }
    }

    /// Backends for the machine we are running on.
    pub fn native() -> Self {
        let processes = Arc::new(system::SystemProcesses::new());
        #[cfg(windows)]
        let windows: Arc<dyn WindowApi> = Arc::new(win32::Win32Windows);
        #[cfg(not(windows))]
        let windows: Arc<dyn WindowApi> = Arc::new(headless::HeadlessWindows::new());
        Self::new(processes, windows)
    }

    /// `root` followed by every descendant currently alive. Launchers that
    /// re-exec the real binary as a child only show windows from the child.
    pub fn process_tree(&self, root: ProcessId) -> Vec<ProcessId> {
        let mut tree = vec![root];
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);

        while let Some(pid) = queue.pop_front() {
            for child in self.processes.child_processes(pid) {
                if tree.len() >= MAX_TREE_SIZE {
                    return tree;
                }
                if seen.insert(child) {
                    tree.push(child);
                    queue.push_back(child);
                }
            }
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeOs;
    use super::*;

    #[test]
    fn process_tree_includes_grandchildren_once() {
        let os = FakeOs::new();
        let root = os.spawn_external("shim");
        let child = os.spawn_child(root, "worker");
        let grandchild = os.spawn_child(child, "renderer");
        let platform = os.platform();

        let tree = platform.process_tree(root);
        assert_eq!(tree, vec![root, child, grandchild]);
    }

    #[test]
    fn process_tree_of_leaf_is_root_only() {
        let os = FakeOs::new();
        let root = os.spawn_external("solo");
        assert_eq!(os.platform().process_tree(root), vec![root]);
    }
}
