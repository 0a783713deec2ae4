use std::time::Duration;

use crate::{
    os::{ProcessId, WindowId},
    run::Phase,
};

/// Everything the orchestrator reports while it works. Rendering is up to the
/// sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PhaseChanged {
        phase: Phase,
    },
    LaunchAttempted {
        program: String,
    },
    LaunchSucceeded {
        program: String,
        pid: ProcessId,
    },
    LaunchFailed {
        program: String,
        detail: String,
        fatal: bool,
    },
    ExistingInstance {
        program: String,
        pids: Vec<ProcessId>,
    },
    WindowMinimized {
        program: String,
        window: WindowId,
        title: Option<String>,
    },
    MinimizeFailed {
        program: String,
        window: WindowId,
        detail: String,
    },
    WindowNotFound {
        program: String,
        detail: String,
    },
    WindowSearchRetried {
        program: String,
        attempts: u32,
    },
    SplashMonitorStarted {
        program: String,
        budget: Duration,
    },
    SplashMonitorFinished {
        program: String,
        minimized: usize,
        cancelled: bool,
    },
    LivenessLost {
        program: String,
        pid: ProcessId,
    },
    StopRequested {
        reason: String,
    },
    TerminationRequested {
        program: String,
        pid: ProcessId,
    },
    TerminationSucceeded {
        program: String,
        forceful: bool,
    },
    TerminationEscalated {
        program: String,
        pid: ProcessId,
    },
    TerminationFailed {
        program: String,
        detail: String,
    },
    AlreadyExited {
        program: String,
    },
    Fatal {
        detail: String,
    },
}

pub trait LogSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events to `tracing` with the program name as a field.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: Event) {
        use tracing::{debug, error, info, warn};

        match event {
            Event::PhaseChanged { phase } => debug!(?phase, "phase changed"),
            Event::LaunchAttempted { program } => info!(%program, "starting"),
            Event::LaunchSucceeded { program, pid } => info!(%program, %pid, "started"),
            Event::LaunchFailed {
                program,
                detail,
                fatal: true,
            } => error!(%program, %detail, "main program failed to start"),
            Event::LaunchFailed {
                program, detail, ..
            } => error!(%program, %detail, "failed to start, skipping"),
            Event::ExistingInstance { program, pids } => warn!(
                %program,
                ?pids,
                "already running, starting another instance anyway"
            ),
            Event::WindowMinimized {
                program,
                window,
                title,
            } => info!(
                %program,
                %window,
                title = title.as_deref().unwrap_or("(no title)"),
                "minimized window"
            ),
            Event::MinimizeFailed {
                program,
                window,
                detail,
            } => warn!(%program, %window, %detail, "could not minimize window"),
            Event::WindowNotFound { program, detail } => {
                warn!(%program, %detail, "no window minimized")
            }
            Event::WindowSearchRetried { program, attempts } => {
                info!(%program, attempts, "searching for window again")
            }
            Event::SplashMonitorStarted { program, budget } => {
                info!(%program, ?budget, "watching for splash and late windows")
            }
            Event::SplashMonitorFinished {
                program,
                minimized,
                cancelled,
            } => info!(%program, minimized, cancelled, "splash monitor finished"),
            Event::LivenessLost { program, pid } => {
                info!(%program, %pid, "main program has exited, closing helpers")
            }
            Event::StopRequested { reason } => info!(%reason, "stop requested, closing helpers"),
            Event::TerminationRequested { program, pid } => info!(%program, %pid, "closing"),
            Event::TerminationSucceeded { program, forceful } => {
                info!(%program, forceful, "closed")
            }
            Event::TerminationEscalated { program, pid } => {
                warn!(%program, %pid, "did not close in time, killing")
            }
            Event::TerminationFailed { program, detail } => {
                error!(%program, %detail, "could not be terminated")
            }
            Event::AlreadyExited { program } => info!(%program, "already exited"),
            Event::Fatal { detail } => error!(%detail, "fatal"),
        }
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingSink;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        sink.emit(Event::LaunchAttempted {
            program: "a".into(),
        });
        sink.emit(Event::LaunchAttempted {
            program: "b".into(),
        });
        assert_eq!(
            sink.events(),
            [
                Event::LaunchAttempted {
                    program: "a".into()
                },
                Event::LaunchAttempted {
                    program: "b".into()
                },
            ]
        );
        assert_eq!(
            sink.count(|e| matches!(e, Event::LaunchAttempted { .. })),
            2
        );
    }
}
