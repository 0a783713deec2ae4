use std::{sync::Arc, time::Instant};

use crossbeam::channel::Sender;

use crate::{config::ProgramSpec, os::ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    WindowSearch,
    Minimized,
    Steady,
    Terminating,
    Terminated,
}

impl LifecycleState {
    pub fn can_become(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Terminated, _) => false,
            (Terminating, Terminated) => true,
            (Terminating, _) => false,
            (_, Terminating) => true,
            (Starting, WindowSearch | Steady)
            | (WindowSearch, Minimized | Steady)
            | (Minimized, WindowSearch | Steady) => true,
            // Second search for a window that was not found the first time.
            (Steady, WindowSearch) => true,
            _ => false,
        }
    }
}

/// Read-only view of a running program handed to background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTarget {
    pub name: String,
    pub pid: ProcessId,
}

/// A lifecycle change observed by a background task. The supervisor applies
/// it to the matching handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateReport {
    pub pid: ProcessId,
    pub state: LifecycleState,
}

#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    pid: ProcessId,
    tx: Sender<StateReport>,
}

impl Reporter {
    pub fn new(pid: ProcessId, tx: Sender<StateReport>) -> Self {
        Self { pid, tx }
    }

    pub fn report(&self, state: LifecycleState) {
        // The supervisor may already be gone during teardown.
        let _ = self.tx.send(StateReport {
            pid: self.pid,
            state,
        });
    }
}

#[derive(Debug)]
pub struct ProcessHandle {
    spec: Arc<ProgramSpec>,
    pid: ProcessId,
    sequence: usize,
    started_at: Instant,
    state: LifecycleState,
}

impl ProcessHandle {
    pub(crate) fn new(spec: Arc<ProgramSpec>, pid: ProcessId, sequence: usize) -> Self {
        Self {
            spec,
            pid,
            sequence,
            started_at: Instant::now(),
            state: LifecycleState::Starting,
        }
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Position in the start order, counting from zero.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn target(&self) -> ProcessTarget {
        ProcessTarget {
            name: self.spec.name.clone(),
            pid: self.pid,
        }
    }

    /// Move to `next` if the lifecycle allows it.
    pub(crate) fn advance(&mut self, next: LifecycleState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_become(next) {
            tracing::debug!(
                program = %self.spec.name,
                from = ?self.state,
                to = ?next,
                "ignoring lifecycle transition"
            );
            return false;
        }
        self.state = next;
        true
    }
}
