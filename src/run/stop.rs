use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// Why an operator asked the orchestrator to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    ConsoleClosed,
}

impl StopReason {
    pub fn label(self) -> &'static str {
        match self {
            StopReason::Interrupt => "interrupt (Ctrl+C)",
            StopReason::Terminate => "termination signal",
            StopReason::ConsoleClosed => "console closed",
        }
    }
}

/// Owning side of a cancellation pair. Dropping it cancels.
#[derive(Debug)]
pub struct StopHandle {
    _tx: Sender<()>,
}

/// Receiving side of a cancellation pair, polled by background loops.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = channel::bounded(0);
    (StopHandle { _tx: tx }, StopSignal { rx })
}

impl StopSignal {
    /// Sleep for `timeout` unless cancelled first. Returns true when
    /// cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

/// A background window job for one program. Dropping it asks the job to
/// stop without waiting; `cancel` also waits for it.
#[derive(Debug)]
pub(crate) struct WindowTask {
    stop: Option<StopHandle>,
    join: Option<JoinHandle<()>>,
}

impl WindowTask {
    pub fn spawn(name: &str, body: impl FnOnce(StopSignal) + Send + 'static) -> io::Result<Self> {
        let (handle, signal) = stop_pair();
        let join = thread::Builder::new()
            .name(format!("window:{name}"))
            .spawn(move || body(signal))?;
        Ok(Self {
            stop: Some(handle),
            join: Some(join),
        })
    }

    pub fn request_stop(&mut self) {
        self.stop.take();
    }

    pub fn cancel(mut self) {
        self.request_stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("window task panicked");
            }
        }
    }
}

impl Drop for WindowTask {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Forward Ctrl+C, SIGTERM and console-close events to `tx`. Runs a small
/// single-threaded tokio runtime on its own thread.
pub fn spawn_signal_listener(tx: Sender<StopReason>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("stop-listener".into())
        .spawn(move || {
            if let Some(reason) = runtime.block_on(wait_for_signal()) {
                let _ = tx.send(reason);
            }
        })
        .context("failed to spawn signal listener")?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<StopReason> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(err) => {
            tracing::warn!("cannot listen for SIGTERM: {err}");
            return interrupt().await;
        }
    };
    tokio::select! {
        reason = interrupt() => reason,
        _ = terminate.recv() => Some(StopReason::Terminate),
    }
}

#[cfg(windows)]
async fn wait_for_signal() -> Option<StopReason> {
    use tokio::signal::windows::ctrl_close;

    let mut close = match ctrl_close() {
        Ok(close) => close,
        Err(err) => {
            tracing::warn!("cannot listen for console close: {err}");
            return interrupt().await;
        }
    };
    tokio::select! {
        reason = interrupt() => reason,
        _ = close.recv() => Some(StopReason::ConsoleClosed),
    }
}

#[cfg(not(any(unix, windows)))]
async fn wait_for_signal() -> Option<StopReason> {
    interrupt().await
}

async fn interrupt() -> Option<StopReason> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some(StopReason::Interrupt),
        Err(err) => {
            tracing::warn!("cannot listen for Ctrl+C: {err}");
            None
        }
    }
}
