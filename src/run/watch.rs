use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};

use crate::{
    events::{Event, LogSink},
    os::{ProcessApi, ProcessId},
};

use super::{handle::ProcessTarget, stop::StopSignal};

/// Consecutive failed checks before the main program counts as gone. A single
/// miss can be a snapshot taken while the process table was changing.
const MISSES_REQUIRED: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessLost {
    pub pid: ProcessId,
}

#[derive(Debug, Default)]
struct MissCounter {
    misses: u32,
}

impl MissCounter {
    /// Returns true once enough consecutive misses have been seen.
    fn observe(&mut self, alive: bool) -> bool {
        if alive {
            self.misses = 0;
            return false;
        }
        self.misses += 1;
        self.misses >= MISSES_REQUIRED
    }
}

/// Poll the main program until it is gone or `stop` fires. The returned
/// channel yields at most one value.
pub(crate) fn start(
    processes: Arc<dyn ProcessApi>,
    target: ProcessTarget,
    poll: Duration,
    stop: StopSignal,
    sink: Arc<dyn LogSink>,
) -> Result<Receiver<LivenessLost>> {
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new()
        .name("main-watcher".into())
        .spawn(move || {
            let mut counter = MissCounter::default();
            loop {
                let alive = processes.exists(target.pid);
                if counter.observe(alive) {
                    sink.emit(Event::LivenessLost {
                        program: target.name.clone(),
                        pid: target.pid,
                    });
                    let _ = tx.send(LivenessLost { pid: target.pid });
                    return;
                }
                if !alive {
                    tracing::debug!(program = %target.name, "main program missing, confirming");
                }
                if stop.wait(poll) {
                    return;
                }
            }
        })
        .context("failed to spawn main watcher")?;
    Ok(rx)
}
