mod handle;
mod launch;
mod lock;
mod shutdown;
mod splash;
mod stop;
mod watch;
mod window;

use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::Arc,
};

use crossbeam::channel::{self, Receiver, Sender, never, select};

use crate::{
    config::{AppConfig, ProgramSet, ProgramSpec, Role, StartupBehavior, Timing},
    error::RunError,
    events::{Event, LogSink},
    os::{Platform, ProcessId},
};

use handle::{LifecycleState, ProcessHandle, Reporter, StateReport};
use launch::ProcessLauncher;
use splash::SplashPolicy;
use stop::{WindowTask, stop_pair};
use watch::LivenessLost;
use window::SearchPolicy;

pub use lock::{acquire_launch_lock, launch_lock_path};
pub use shutdown::TerminationOutcome;
pub use stop::{StopReason, spawn_signal_listener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Launching,
    Running,
    ShuttingDown,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    LivenessLost,
    StopRequested(StopReason),
}

/// What a finished run did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub cause: ShutdownCause,
    pub launched: Vec<String>,
    pub terminated: Vec<(String, TerminationOutcome)>,
}

/// Owns every program started during a run and drives the run through its
/// phases. Background window tasks never touch handles directly; they send
/// state reports that are applied here.
pub struct Supervisor {
    platform: Platform,
    timing: Timing,
    sink: Arc<dyn LogSink>,
    phase: Phase,
    handles: Vec<ProcessHandle>,
    tasks: HashMap<ProcessId, WindowTask>,
    launcher: ProcessLauncher,
    reports_tx: Sender<StateReport>,
    reports_rx: Receiver<StateReport>,
    launched: Vec<String>,
    // Normal helpers whose first search found nothing, waiting for Running.
    pending_retries: Vec<ProcessId>,
    retried: HashSet<ProcessId>,
}

impl Supervisor {
    pub fn new(platform: Platform, timing: Timing, sink: Arc<dyn LogSink>) -> Self {
        let (reports_tx, reports_rx) = channel::unbounded();
        Self {
            launcher: ProcessLauncher::new(platform.clone(), sink.clone()),
            platform,
            timing,
            sink,
            phase: Phase::Idle,
            handles: Vec::new(),
            tasks: HashMap::new(),
            reports_tx,
            reports_rx,
            launched: Vec::new(),
            pending_retries: Vec::new(),
            retried: HashSet::new(),
        }
    }

    /// Launch helpers then the main program, wait for the main program to go
    /// away (or for `stop`), then close the helpers in reverse order.
    pub fn run(
        mut self,
        programs: &ProgramSet,
        stop: &Receiver<StopReason>,
    ) -> Result<RunReport, RunError> {
        self.enter(Phase::Launching);

        for spec in &programs.helpers {
            if let Some(cause) = self.pending_stop(stop) {
                return Ok(self.finish(cause));
            }
            self.launch_helper(spec);
            self.drain_reports();
        }
        if let Some(cause) = self.pending_stop(stop) {
            return Ok(self.finish(cause));
        }

        let main_spec = Arc::new(programs.main.clone());
        let mut main = match self.launcher.launch(&main_spec) {
            Ok(handle) => handle,
            Err(source) => {
                self.sink.emit(Event::Fatal {
                    detail: format!("main program '{}' did not start: {source}", main_spec.name),
                });
                self.shut_down();
                return Err(RunError::MainLaunch {
                    name: main_spec.name.clone(),
                    source,
                });
            }
        };
        main.advance(LifecycleState::Steady);
        let main_target = main.target();
        self.launched.push(main.name().to_owned());
        self.handles.push(main);

        self.enter(Phase::Running);
        self.dispatch_retries();
        let (watch_stop, watch_signal) = stop_pair();
        let lost = match watch::start(
            self.platform.processes.clone(),
            main_target,
            self.timing.main_poll(),
            watch_signal,
            self.sink.clone(),
        ) {
            Ok(lost) => lost,
            Err(err) => {
                self.sink.emit(Event::Fatal {
                    detail: format!("{err:#}"),
                });
                self.shut_down();
                return Err(err.into());
            }
        };

        let cause = self.wait_for_shutdown(lost, stop);
        drop(watch_stop);
        Ok(self.finish(cause))
    }

    fn enter(&mut self, phase: Phase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
        self.sink.emit(Event::PhaseChanged { phase });
    }

    fn launch_helper(&mut self, spec: &ProgramSpec) {
        let spec = Arc::new(spec.clone());
        // Failures are already reported by the launcher; the next program
        // still gets its turn.
        let Ok(mut handle) = self.launcher.launch(&spec) else {
            return;
        };
        self.launched.push(handle.name().to_owned());

        let reporter = Reporter::new(handle.pid(), self.reports_tx.clone());
        let task = match spec.startup {
            StartupBehavior::SystrayOnly => {
                handle.advance(LifecycleState::Steady);
                None
            }
            StartupBehavior::Normal => Some(window::spawn_resolver(
                self.platform.clone(),
                handle.target(),
                SearchPolicy {
                    max_attempts: self.timing.window_search_max_attempts,
                    interval: self.timing.attempt_interval(),
                },
                self.sink.clone(),
                reporter,
            )),
            StartupBehavior::SplashScreen => Some(splash::spawn_monitor(
                self.platform.clone(),
                handle.target(),
                SplashPolicy {
                    budget: self.timing.splash_budget(),
                    poll: self.timing.splash_poll(),
                },
                self.sink.clone(),
                reporter,
            )),
        };

        match task {
            Some(Ok(task)) => {
                self.tasks.insert(handle.pid(), task);
            }
            Some(Err(err)) => {
                tracing::error!(program = %handle.name(), "failed to start window task: {err}");
                handle.advance(LifecycleState::Steady);
            }
            None => {}
        }
        self.handles.push(handle);
    }

    fn wait_for_shutdown(
        &mut self,
        lost: Receiver<LivenessLost>,
        stop: &Receiver<StopReason>,
    ) -> ShutdownCause {
        let reports = self.reports_rx.clone();
        let mut stop = stop.clone();

        loop {
            let mut stop_closed = false;
            select! {
                recv(lost) -> msg => {
                    match msg {
                        Ok(lost) => tracing::debug!(pid = %lost.pid, "main program gone"),
                        Err(_) => tracing::warn!(
                            "main watcher stopped without a result, treating main program as gone"
                        ),
                    }
                    return ShutdownCause::LivenessLost;
                }
                recv(stop) -> msg => match msg {
                    Ok(reason) => return self.stop_requested(reason),
                    Err(_) => stop_closed = true,
                },
                recv(reports) -> msg => {
                    if let Ok(report) = msg {
                        self.apply(report);
                    }
                }
            }
            // Nobody can ask us to stop any more; only the watcher matters.
            if stop_closed {
                stop = never();
            }
        }
    }

    fn pending_stop(&self, stop: &Receiver<StopReason>) -> Option<ShutdownCause> {
        stop.try_recv().ok().map(|reason| self.stop_requested(reason))
    }

    fn stop_requested(&self, reason: StopReason) -> ShutdownCause {
        self.sink.emit(Event::StopRequested {
            reason: reason.label().into(),
        });
        ShutdownCause::StopRequested(reason)
    }

    fn apply(&mut self, report: StateReport) {
        let Some(handle) = self.handles.iter_mut().find(|h| h.pid() == report.pid) else {
            return;
        };
        let before = handle.state();
        if !handle.advance(report.state) {
            return;
        }

        // Settling straight out of a search means nothing was minimized.
        let missed = before == LifecycleState::WindowSearch
            && report.state == LifecycleState::Steady
            && handle.spec().startup == StartupBehavior::Normal;
        if missed && self.timing.retry_search_max_attempts > 0 && self.retried.insert(report.pid)
        {
            self.pending_retries.push(report.pid);
        }
        if self.phase == Phase::Running {
            self.dispatch_retries();
        }
    }

    /// Give each queued helper one more, longer window search. Runs once
    /// everything is launched, like a second pass over the stragglers.
    fn dispatch_retries(&mut self) {
        for pid in mem::take(&mut self.pending_retries) {
            let Some(target) = self.handles.iter().find(|h| h.pid() == pid).map(|h| h.target())
            else {
                continue;
            };
            if !self.platform.processes.exists(pid) {
                tracing::debug!(program = %target.name, "process is gone, not searching again");
                continue;
            }
            if let Some(previous) = self.tasks.remove(&pid) {
                previous.cancel();
            }

            self.sink.emit(Event::WindowSearchRetried {
                program: target.name.clone(),
                attempts: self.timing.retry_search_max_attempts,
            });
            let name = target.name.clone();
            let spawned = window::spawn_resolver(
                self.platform.clone(),
                target,
                SearchPolicy {
                    max_attempts: self.timing.retry_search_max_attempts,
                    interval: self.timing.retry_interval(),
                },
                self.sink.clone(),
                Reporter::new(pid, self.reports_tx.clone()),
            );
            match spawned {
                Ok(task) => {
                    self.tasks.insert(pid, task);
                }
                Err(err) => tracing::error!(program = %name, "failed to start window task: {err}"),
            }
        }
    }

    fn drain_reports(&mut self) {
        while let Ok(report) = self.reports_rx.try_recv() {
            self.apply(report);
        }
    }

    fn finish(mut self, cause: ShutdownCause) -> RunReport {
        let terminated = self.shut_down();
        RunReport {
            cause,
            launched: self.launched,
            terminated,
        }
    }

    /// Close every helper, newest first. The main program is left alone: it
    /// has either exited already or belongs to the user.
    fn shut_down(&mut self) -> Vec<(String, TerminationOutcome)> {
        self.enter(Phase::ShuttingDown);
        self.pending_retries.clear();
        for task in self.tasks.values_mut() {
            task.request_stop();
        }
        self.drain_reports();

        let grace = self.timing.grace_timeout();
        let mut outcomes = Vec::new();
        while let Some(mut handle) = self.handles.pop() {
            if handle.spec().role == Role::Main {
                continue;
            }
            if let Some(task) = self.tasks.remove(&handle.pid()) {
                task.cancel();
            }
            let outcome =
                shutdown::terminate_helper(&self.platform, &mut handle, grace, self.sink.as_ref());
            outcomes.push((handle.name().to_owned(), outcome));
        }

        self.enter(Phase::Done);
        outcomes
    }
}

/// Validate `config` and run it to completion.
pub fn run_programs(
    config: &AppConfig,
    platform: Platform,
    sink: Arc<dyn LogSink>,
    stop: &Receiver<StopReason>,
) -> Result<RunReport, RunError> {
    let programs = config.validate()?;
    Supervisor::new(platform, config.timing, sink).run(&programs, stop)
}
