use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    events::{Event, LogSink},
    os::{Platform, ProcessApi, ProcessId},
};

use super::handle::{LifecycleState, ProcessHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    Terminated { forceful: bool },
    AlreadyExited,
    Failed(String),
}

/// Close one helper and everything it spawned: ask nicely, wait up to
/// `grace`, then kill whatever is left and wait once more. Never panics and
/// never gives up on the rest of the cascade.
pub(crate) fn terminate_helper(
    platform: &Platform,
    handle: &mut ProcessHandle,
    grace: Duration,
    sink: &dyn LogSink,
) -> TerminationOutcome {
    let program = handle.name().to_owned();
    tracing::debug!(
        %program,
        state = ?handle.state(),
        sequence = handle.sequence(),
        uptime = ?handle.started_at().elapsed(),
        "terminating"
    );
    handle.advance(LifecycleState::Terminating);

    let processes = platform.processes.as_ref();
    let tree: Vec<_> = platform
        .process_tree(handle.pid())
        .into_iter()
        .filter(|pid| processes.exists(*pid))
        .collect();
    if tree.is_empty() {
        sink.emit(Event::AlreadyExited { program });
        handle.advance(LifecycleState::Terminated);
        return TerminationOutcome::AlreadyExited;
    }

    sink.emit(Event::TerminationRequested {
        program: program.clone(),
        pid: handle.pid(),
    });
    for pid in &tree {
        if let Err(err) = processes.terminate(*pid, false) {
            tracing::debug!(%program, %pid, "graceful close failed: {err:#}");
        }
    }
    let survivors = wait_for_exit(processes, tree, grace);
    if survivors.is_empty() {
        sink.emit(Event::TerminationSucceeded {
            program,
            forceful: false,
        });
        handle.advance(LifecycleState::Terminated);
        return TerminationOutcome::Terminated { forceful: false };
    }

    sink.emit(Event::TerminationEscalated {
        program: program.clone(),
        pid: handle.pid(),
    });
    let mut errors = Vec::new();
    for pid in &survivors {
        if let Err(err) = processes.terminate(*pid, true) {
            errors.push(format!("{pid}: {err:#}"));
        }
    }
    let survivors = wait_for_exit(processes, survivors, grace);
    handle.advance(LifecycleState::Terminated);
    if survivors.is_empty() {
        sink.emit(Event::TerminationSucceeded {
            program,
            forceful: true,
        });
        return TerminationOutcome::Terminated { forceful: true };
    }

    let pids: Vec<_> = survivors.iter().map(ToString::to_string).collect();
    let mut detail = format!("still running after kill: {}", pids.join(", "));
    if !errors.is_empty() {
        detail.push_str(&format!(" ({})", errors.join("; ")));
    }
    sink.emit(Event::TerminationFailed {
        program,
        detail: detail.clone(),
    });
    TerminationOutcome::Failed(detail)
}

/// Wait until every pid in `pids` is gone or `timeout` passes. Returns the
/// ones still alive.
fn wait_for_exit(
    processes: &dyn ProcessApi,
    mut pids: Vec<ProcessId>,
    timeout: Duration,
) -> Vec<ProcessId> {
    let step = (timeout / 10).clamp(Duration::from_millis(10), Duration::from_millis(250));
    let deadline = Instant::now() + timeout;
    loop {
        pids.retain(|pid| processes.exists(*pid));
        if pids.is_empty() || Instant::now() >= deadline {
            return pids;
        }
        thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
}
