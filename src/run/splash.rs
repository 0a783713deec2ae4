use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    events::{Event, LogSink},
    os::Platform,
};

use super::{
    handle::{LifecycleState, ProcessTarget, Reporter},
    stop::{StopSignal, WindowTask},
    window::sweep,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplashPolicy {
    pub budget: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplashSummary {
    pub minimized: usize,
    pub cancelled: bool,
}

/// Keep minimizing windows of a program that shows a splash screen first and
/// its real window later. Anything that becomes visible again within the
/// budget is minimized again.
pub(crate) fn monitor(
    platform: &Platform,
    target: &ProcessTarget,
    policy: SplashPolicy,
    stop: &StopSignal,
    sink: &dyn LogSink,
    reporter: &Reporter,
) -> SplashSummary {
    sink.emit(Event::SplashMonitorStarted {
        program: target.name.clone(),
        budget: policy.budget,
    });
    reporter.report(LifecycleState::WindowSearch);

    let deadline = Instant::now() + policy.budget;
    let mut state = LifecycleState::WindowSearch;
    let mut minimized = 0;
    let mut cancelled = false;

    let mut record = |count: usize, state: &mut LifecycleState| {
        if count == 0 {
            return;
        }
        minimized += count;
        if *state == LifecycleState::Minimized {
            reporter.report(LifecycleState::WindowSearch);
        }
        reporter.report(LifecycleState::Minimized);
        *state = LifecycleState::Minimized;
    };

    loop {
        let pass = sweep(platform, target, sink);
        record(pass.minimized, &mut state);

        if pass.tree_size <= 1 && !platform.processes.exists(target.pid) {
            tracing::debug!(program = %target.name, "process tree is gone, ending splash watch");
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if stop.wait(policy.poll.min(deadline - now)) {
            cancelled = true;
            break;
        }
        if Instant::now() >= deadline {
            // One last look at the deadline itself.
            let last = sweep(platform, target, sink);
            record(last.minimized, &mut state);
            break;
        }
    }

    sink.emit(Event::SplashMonitorFinished {
        program: target.name.clone(),
        minimized,
        cancelled,
    });
    SplashSummary {
        minimized,
        cancelled,
    }
}

pub(crate) fn spawn_monitor(
    platform: Platform,
    target: ProcessTarget,
    policy: SplashPolicy,
    sink: Arc<dyn LogSink>,
    reporter: Reporter,
) -> io::Result<WindowTask> {
    let name = target.name.clone();
    WindowTask::spawn(&name, move |stop| {
        let summary = monitor(&platform, &target, policy, &stop, sink.as_ref(), &reporter);
        if !summary.cancelled {
            reporter.report(LifecycleState::Steady);
        }
    })
}
