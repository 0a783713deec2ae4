//! Scriptable in-memory OS used by the orchestrator tests. Every mutating
//! call is recorded so tests can assert on ordering.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use parking_lot::Mutex;

use super::{Platform, ProcessApi, ProcessId, WindowApi, WindowId};
use crate::error::{LaunchError, LaunchFailure};

#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub fail: Option<LaunchFailure>,
    /// Delay after start for each window the program opens.
    pub windows: Vec<Duration>,
    /// Windows belong to a child process instead of the launched one.
    pub shim: bool,
    /// `exists` reports the process gone after this many checks.
    pub lives_for_checks: Option<u32>,
    /// Check numbers (1-based) that report a missing process once.
    pub glitch_checks: Vec<u32>,
    pub ignores_graceful: bool,
    pub unkillable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Start(PathBuf),
    Minimize { pid: ProcessId, window: WindowId },
    Terminate { pid: ProcessId, forceful: bool },
}

#[derive(Debug)]
struct FakeProcess {
    path: Option<PathBuf>,
    parent: Option<ProcessId>,
    alive: bool,
    checks: u32,
    script: Script,
}

#[derive(Debug)]
struct FakeWindow {
    id: WindowId,
    owner: ProcessId,
    appears_at: Instant,
    visible: bool,
    minimized: bool,
    minimized_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    next_pid: u32,
    next_window: isize,
    scripts: HashMap<PathBuf, Script>,
    processes: HashMap<ProcessId, FakeProcess>,
    windows: Vec<FakeWindow>,
    calls: Vec<Call>,
    window_queries: HashMap<ProcessId, usize>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeOs {
    state: Arc<Mutex<State>>,
}

impl State {
    fn add_process(&mut self, path: Option<PathBuf>, parent: Option<ProcessId>, script: Script) -> ProcessId {
        self.next_pid += 1;
        let pid = ProcessId(1000 + self.next_pid);
        self.processes.insert(
            pid,
            FakeProcess {
                path,
                parent,
                alive: true,
                checks: 0,
                script,
            },
        );
        pid
    }

    fn add_window(&mut self, owner: ProcessId, appears_at: Instant) -> WindowId {
        self.next_window += 1;
        let id = WindowId(self.next_window);
        self.windows.push(FakeWindow {
            id,
            owner,
            appears_at,
            visible: true,
            minimized: false,
            minimized_at: None,
        });
        id
    }

    fn window(&self, id: WindowId) -> Option<&FakeWindow> {
        self.windows.iter().find(|w| w.id == id)
    }
}

impl FakeOs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(&self) -> Platform {
        Platform::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    pub fn script(&self, path: impl Into<PathBuf>, script: Script) {
        self.state.lock().scripts.insert(path.into(), script);
    }

    /// A process that was not started through `start`.
    pub fn spawn_external(&self, path: &str) -> ProcessId {
        self.state
            .lock()
            .add_process(Some(PathBuf::from(path)), None, Script::default())
    }

    pub fn spawn_child(&self, parent: ProcessId, path: &str) -> ProcessId {
        self.state
            .lock()
            .add_process(Some(PathBuf::from(path)), Some(parent), Script::default())
    }

    pub fn open_window(&self, owner: ProcessId) -> WindowId {
        self.state.lock().add_window(owner, Instant::now())
    }

    pub fn open_hidden_window(&self, owner: ProcessId) -> WindowId {
        let mut state = self.state.lock();
        let id = state.add_window(owner, Instant::now());
        if let Some(window) = state.windows.iter_mut().find(|w| w.id == id) {
            window.visible = false;
        }
        id
    }

    /// The application raising its own window again.
    pub fn restore_window(&self, id: WindowId) {
        if let Some(window) = self.state.lock().windows.iter_mut().find(|w| w.id == id) {
            window.minimized = false;
        }
    }

    pub fn exit(&self, pid: ProcessId) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            process.alive = false;
        }
    }

    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.state
            .lock()
            .processes
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    pub fn is_window_minimized(&self, id: WindowId) -> bool {
        self.state.lock().window(id).is_some_and(|w| w.minimized)
    }

    pub fn window_appears_at(&self, id: WindowId) -> Option<Instant> {
        self.state.lock().window(id).map(|w| w.appears_at)
    }

    /// When the window was last minimized.
    pub fn window_minimized_at(&self, id: WindowId) -> Option<Instant> {
        self.state.lock().window(id).and_then(|w| w.minimized_at)
    }

    pub fn windows_of(&self, pid: ProcessId) -> Vec<WindowId> {
        self.state
            .lock()
            .windows
            .iter()
            .filter(|w| w.owner == pid)
            .map(|w| w.id)
            .collect()
    }

    /// Most recent top-level process started from `path`.
    pub fn pid_of(&self, path: &str) -> Option<ProcessId> {
        self.state
            .lock()
            .processes
            .iter()
            .filter(|(_, p)| p.path.as_deref() == Some(Path::new(path)) && p.parent.is_none())
            .map(|(pid, _)| *pid)
            .max()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn started(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn minimize_calls(&self, pid: ProcessId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Minimize { pid: p, .. } if *p == pid))
            .count()
    }

    pub fn terminate_calls(&self) -> Vec<(ProcessId, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Terminate { pid, forceful } => Some((pid, forceful)),
                _ => None,
            })
            .collect()
    }

    pub fn window_queries(&self, pid: ProcessId) -> usize {
        self.state
            .lock()
            .window_queries
            .get(&pid)
            .copied()
            .unwrap_or(0)
    }
}

impl ProcessApi for FakeOs {
    fn start(&self, path: &Path, _arguments: &str) -> Result<ProcessId, LaunchError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Start(path.to_path_buf()));
        let script = state.scripts.get(path).cloned().unwrap_or_default();
        if let Some(reason) = script.fail {
            return Err(LaunchError::new(reason, format!("{}", path.display())));
        }

        let now = Instant::now();
        let pid = state.add_process(Some(path.to_path_buf()), None, script.clone());
        let owner = if script.shim {
            state.add_process(None, Some(pid), Script::default())
        } else {
            pid
        };
        for delay in &script.windows {
            state.add_window(owner, now + *delay);
        }
        Ok(pid)
    }

    fn exists(&self, pid: ProcessId) -> bool {
        let mut state = self.state.lock();
        let Some(process) = state.processes.get_mut(&pid) else {
            return false;
        };
        process.checks += 1;
        if let Some(limit) = process.script.lives_for_checks {
            if process.checks > limit {
                process.alive = false;
            }
        }
        if process.script.glitch_checks.contains(&process.checks) {
            return false;
        }
        process.alive
    }

    fn terminate(&self, pid: ProcessId, forceful: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Terminate { pid, forceful });
        let Some(process) = state.processes.get_mut(&pid) else {
            bail!("no such process: {pid}");
        };
        if forceful {
            if process.script.unkillable {
                bail!("access denied");
            }
            process.alive = false;
        } else if !process.script.ignores_graceful {
            process.alive = false;
        }
        Ok(())
    }

    fn child_processes(&self, pid: ProcessId) -> Vec<ProcessId> {
        let state = self.state.lock();
        let mut children: Vec<_> = state
            .processes
            .iter()
            .filter(|(_, p)| p.alive && p.parent == Some(pid))
            .map(|(child, _)| *child)
            .collect();
        children.sort();
        children
    }

    fn instances_of(&self, path: &Path) -> Vec<ProcessId> {
        let state = self.state.lock();
        let mut pids: Vec<_> = state
            .processes
            .iter()
            .filter(|(_, p)| p.alive && p.path.as_deref() == Some(path))
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort();
        pids
    }
}

impl WindowApi for FakeOs {
    fn windows_owned_by(&self, pids: &[ProcessId]) -> Vec<WindowId> {
        let mut state = self.state.lock();
        if let Some(root) = pids.first() {
            *state.window_queries.entry(*root).or_default() += 1;
        }
        let now = Instant::now();
        state
            .windows
            .iter()
            .filter(|w| w.appears_at <= now && pids.contains(&w.owner))
            .filter(|w| state.processes.get(&w.owner).is_some_and(|p| p.alive))
            .map(|w| w.id)
            .collect()
    }

    fn is_visible(&self, window: WindowId) -> bool {
        self.state.lock().window(window).is_some_and(|w| w.visible)
    }

    fn is_minimized(&self, window: WindowId) -> bool {
        self.is_window_minimized(window)
    }

    fn minimize(&self, window: WindowId) -> Result<()> {
        let mut state = self.state.lock();
        let Some(owner) = state.window(window).map(|w| w.owner) else {
            bail!("invalid window handle {window}");
        };
        state.calls.push(Call::Minimize { pid: owner, window });
        if let Some(w) = state.windows.iter_mut().find(|w| w.id == window) {
            w.minimized = true;
            w.minimized_at = Some(Instant::now());
        }
        Ok(())
    }

    fn title(&self, window: WindowId) -> Option<String> {
        Some(format!("window {window}"))
    }
}
