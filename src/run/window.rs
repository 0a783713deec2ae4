use std::{io, sync::Arc, time::Duration};

use crate::{
    events::{Event, LogSink},
    os::Platform,
};

use super::{
    handle::{LifecycleState, ProcessTarget, Reporter},
    stop::{StopSignal, WindowTask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found,
    NotFound,
    Cancelled,
}

/// Result of one pass over a process tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Sweep {
    pub tree_size: usize,
    pub seen: usize,
    pub minimized: usize,
}

/// Minimize every visible, not yet minimized top-level window owned by the
/// target or any of its descendants. Windows that are already minimized are
/// left alone, so repeated sweeps are harmless.
pub(crate) fn sweep(platform: &Platform, target: &ProcessTarget, sink: &dyn LogSink) -> Sweep {
    let tree = platform.process_tree(target.pid);
    let windows = platform.windows.windows_owned_by(&tree);
    let mut result = Sweep {
        tree_size: tree.len(),
        seen: windows.len(),
        minimized: 0,
    };

    for window in windows {
        if !platform.windows.is_visible(window) || platform.windows.is_minimized(window) {
            continue;
        }
        let title = platform.windows.title(window);
        match platform.windows.minimize(window) {
            Ok(()) => {
                result.minimized += 1;
                sink.emit(Event::WindowMinimized {
                    program: target.name.clone(),
                    window,
                    title,
                });
            }
            Err(err) => sink.emit(Event::MinimizeFailed {
                program: target.name.clone(),
                window,
                detail: format!("{err:#}"),
            }),
        }
    }
    result
}

/// Search for the target's windows until one is minimized or the attempt
/// budget runs out.
pub(crate) fn try_minimize(
    platform: &Platform,
    target: &ProcessTarget,
    policy: SearchPolicy,
    stop: &StopSignal,
    sink: &dyn LogSink,
    reporter: &Reporter,
) -> SearchOutcome {
    reporter.report(LifecycleState::WindowSearch);
    let mut seen_any = false;

    for attempt in 1..=policy.max_attempts {
        let result = sweep(platform, target, sink);
        seen_any |= result.seen > 0;
        if result.minimized > 0 {
            reporter.report(LifecycleState::Minimized);
            return SearchOutcome::Found;
        }

        tracing::debug!(
            program = %target.name,
            attempt,
            max = policy.max_attempts,
            seen = result.seen,
            "nothing to minimize yet"
        );
        if attempt < policy.max_attempts && stop.wait(policy.interval) {
            return SearchOutcome::Cancelled;
        }
    }

    let detail = if seen_any {
        format!(
            "windows appeared but none was visible after {} attempts",
            policy.max_attempts
        )
    } else {
        format!("no window appeared after {} attempts", policy.max_attempts)
    };
    sink.emit(Event::WindowNotFound {
        program: target.name.clone(),
        detail,
    });
    SearchOutcome::NotFound
}

/// Run the search on its own thread. The program settles in `Steady` unless
/// the search was cancelled.
pub(crate) fn spawn_resolver(
    platform: Platform,
    target: ProcessTarget,
    policy: SearchPolicy,
    sink: Arc<dyn LogSink>,
    reporter: Reporter,
) -> io::Result<WindowTask> {
    let name = target.name.clone();
    WindowTask::spawn(&name, move |stop| {
        let outcome = try_minimize(&platform, &target, policy, &stop, sink.as_ref(), &reporter);
        if outcome != SearchOutcome::Cancelled {
            reporter.report(LifecycleState::Steady);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::RecordingSink,
        os::fake::{FakeOs, Script},
        run::{handle::StateReport, stop::stop_pair},
    };
    use crossbeam::channel;
    use std::path::Path;

    const FAST: SearchPolicy = SearchPolicy {
        max_attempts: 5,
        interval: Duration::from_millis(10),
    };

    fn target(os: &FakeOs, path: &str, script: Script) -> ProcessTarget {
        use crate::os::ProcessApi;

        os.script(path, script);
        let pid = os.start(Path::new(path), "").unwrap();
        ProcessTarget {
            name: path.into(),
            pid,
        }
    }

    fn reporter(target: &ProcessTarget) -> (Reporter, channel::Receiver<StateReport>) {
        let (tx, rx) = channel::unbounded();
        (Reporter::new(target.pid, tx), rx)
    }

    #[test]
    fn visible_window_is_minimized_on_first_attempt() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(
            &os,
            "/opt/app",
            Script {
                windows: vec![Duration::ZERO],
                ..Default::default()
            },
        );
        let (_stop, signal) = stop_pair();
        let (rep, reports) = reporter(&t);

        let outcome = try_minimize(&os.platform(), &t, FAST, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::Found);
        assert_eq!(os.minimize_calls(t.pid), 1);
        assert_eq!(os.window_queries(t.pid), 1);
        let states: Vec<_> = reports.try_iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            [LifecycleState::WindowSearch, LifecycleState::Minimized]
        );
    }

    #[test]
    fn late_window_is_found_on_a_later_attempt() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(
            &os,
            "/opt/slow",
            Script {
                windows: vec![Duration::from_millis(25)],
                ..Default::default()
            },
        );
        let (_stop, signal) = stop_pair();
        let (rep, _reports) = reporter(&t);
        let policy = SearchPolicy {
            max_attempts: 20,
            interval: Duration::from_millis(10),
        };

        let outcome = try_minimize(&os.platform(), &t, policy, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::Found);
        assert!(os.window_queries(t.pid) > 1);
    }

    #[test]
    fn windows_of_a_child_process_are_found() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(
            &os,
            "/opt/shim",
            Script {
                windows: vec![Duration::ZERO],
                shim: true,
                ..Default::default()
            },
        );
        let (_stop, signal) = stop_pair();
        let (rep, _reports) = reporter(&t);

        let outcome = try_minimize(&os.platform(), &t, FAST, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::Found);
        assert_eq!(os.minimize_calls(t.pid), 0, "root owns no window");
        let platform = os.platform();
        let child = platform.process_tree(t.pid)[1];
        assert_eq!(os.minimize_calls(child), 1);
    }

    #[test]
    fn exhausted_budget_reports_not_found() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(&os, "/opt/tray", Script::default());
        let (_stop, signal) = stop_pair();
        let (rep, _reports) = reporter(&t);

        let outcome = try_minimize(&os.platform(), &t, FAST, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::NotFound);
        assert_eq!(os.window_queries(t.pid), FAST.max_attempts as usize);
        assert!(sink.events().contains(&Event::WindowNotFound {
            program: "/opt/tray".into(),
            detail: "no window appeared after 5 attempts".into(),
        }));
    }

    #[test]
    fn hidden_windows_are_not_minimized() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(&os, "/opt/hidden", Script::default());
        os.open_hidden_window(t.pid);
        let (_stop, signal) = stop_pair();
        let (rep, _reports) = reporter(&t);

        let outcome = try_minimize(&os.platform(), &t, FAST, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::NotFound);
        assert_eq!(os.minimize_calls(t.pid), 0);
        assert_eq!(
            sink.count(|e| matches!(e, Event::WindowNotFound { detail, .. } if detail.contains("none was visible"))),
            1
        );
    }

    #[test]
    fn sweep_skips_already_minimized_windows() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(&os, "/opt/app", Script::default());
        let window = os.open_window(t.pid);
        let platform = os.platform();

        assert_eq!(sweep(&platform, &t, &sink).minimized, 1);
        let again = sweep(&platform, &t, &sink);
        assert_eq!((again.seen, again.minimized), (1, 0));
        assert_eq!(os.minimize_calls(t.pid), 1);
        assert!(os.is_window_minimized(window));
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let os = FakeOs::new();
        let sink = RecordingSink::default();
        let t = target(&os, "/opt/never", Script::default());
        let (stop, signal) = stop_pair();
        let (rep, _reports) = reporter(&t);
        drop(stop);
        let policy = SearchPolicy {
            max_attempts: 100,
            interval: Duration::from_secs(10),
        };

        let outcome = try_minimize(&os.platform(), &t, policy, &signal, &sink, &rep);
        assert_eq!(outcome, SearchOutcome::Cancelled);
        assert_eq!(os.window_queries(t.pid), 1);
    }

    #[test]
    fn resolver_task_settles_in_steady() {
        let os = FakeOs::new();
        let sink = Arc::new(RecordingSink::default());
        let t = target(
            &os,
            "/opt/app",
            Script {
                windows: vec![Duration::ZERO],
                ..Default::default()
            },
        );
        let (rep, reports) = reporter(&t);

        let task = spawn_resolver(os.platform(), t.clone(), FAST, sink, rep).unwrap();
        let last = reports
            .iter()
            .find(|r| r.state == LifecycleState::Steady)
            .map(|r| r.pid);
        assert_eq!(last, Some(t.pid));
        task.cancel();
    }
}
