use std::sync::Arc;

use crate::{
    config::{ProgramSpec, Role},
    error::LaunchError,
    events::{Event, LogSink},
    os::Platform,
};

use super::handle::ProcessHandle;

/// Starts programs one at a time and numbers them in start order.
pub(crate) struct ProcessLauncher {
    platform: Platform,
    sink: Arc<dyn LogSink>,
    next_sequence: usize,
}

impl ProcessLauncher {
    pub fn new(platform: Platform, sink: Arc<dyn LogSink>) -> Self {
        Self {
            platform,
            sink,
            next_sequence: 0,
        }
    }

    pub fn launch(&mut self, spec: &Arc<ProgramSpec>) -> Result<ProcessHandle, LaunchError> {
        self.sink.emit(Event::LaunchAttempted {
            program: spec.name.clone(),
        });

        // Another copy may already be running; we still start our own so
        // that it is ours to close later.
        let existing = self.platform.processes.instances_of(&spec.path);
        if !existing.is_empty() {
            self.sink.emit(Event::ExistingInstance {
                program: spec.name.clone(),
                pids: existing,
            });
        }

        match self.platform.processes.start(&spec.path, &spec.arguments) {
            Ok(pid) => {
                self.sink.emit(Event::LaunchSucceeded {
                    program: spec.name.clone(),
                    pid,
                });
                let handle = ProcessHandle::new(spec.clone(), pid, self.next_sequence);
                self.next_sequence += 1;
                Ok(handle)
            }
            Err(err) => {
                self.sink.emit(Event::LaunchFailed {
                    program: spec.name.clone(),
                    detail: err.to_string(),
                    fatal: spec.role == Role::Main,
                });
                Err(err)
            }
        }
    }
}
