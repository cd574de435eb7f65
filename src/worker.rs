//! AgentWorker - binds one agent invocation to one bridge
//!
//! The worker owns the background task that drives `Agent::stream` and
//! forwards every event into the bound `BridgeSender`. Lifecycle:
//! `Idle -> Running -> {Finished, Failed, Cancelled}`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::agent::{Agent, Prompt, StreamEvent};
use crate::bridge::BridgeSender;

/// Observable worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Running,
            2 => WorkerState::Finished,
            3 => WorkerState::Failed,
            4 => WorkerState::Cancelled,
            _ => WorkerState::Idle,
        }
    }
}

/// One agent invocation bound to one bridge for the lifetime of one turn
pub struct AgentWorker {
    cancel: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl AgentWorker {
    /// Spawn the background task for one `agent.stream(prompt)` run.
    ///
    /// Every yielded event goes into `bridge`; failures inside the task are
    /// converted to terminal events and never escape as panics or errors.
    pub fn start(agent: Arc<dyn Agent>, prompt: Prompt, bridge: BridgeSender) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_notify = Arc::new(Notify::new());
        let state = Arc::new(AtomicU8::new(WorkerState::Running as u8));

        let handle = {
            let cancel = cancel.clone();
            let cancel_notify = cancel_notify.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_stream(agent, prompt, bridge, cancel, cancel_notify, state).await;
            })
        };

        Self {
            cancel,
            cancel_notify,
            state,
            handle,
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Request cooperative cancellation. Idempotent, callable from any
    /// context; a no-op unless the worker is Running.
    pub fn cancel(&self) {
        if !self.is_running() {
            return;
        }
        if !self.cancel.swap(true, Ordering::AcqRel) {
            debug!("worker cancellation requested");
            self.cancel_notify.notify_one();
        }
    }

    /// Await full termination of the background task. Only after this do
    /// the worker's resources (child process, temp files) count as
    /// released. Must be awaited, never block-waited, from the UI side.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn run_stream(
    agent: Arc<dyn Agent>,
    prompt: Prompt,
    bridge: BridgeSender,
    cancel: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    state: Arc<AtomicU8>,
) {
    let mut stream = agent.stream(&prompt).await;

    loop {
        // Cancellation is checked between fragments, and the notify arm
        // interrupts a blocked read so an unresponsive tool cannot pin us
        if cancel.load(Ordering::Acquire) {
            settle_cancelled(&mut stream, &bridge, &state).await;
            return;
        }

        tokio::select! {
            biased;
            _ = cancel_notify.notified() => {
                settle_cancelled(&mut stream, &bridge, &state).await;
                return;
            }
            event = stream.next() => {
                match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        let failed = matches!(event, StreamEvent::Error { .. });
                        bridge.push(event);
                        if terminal {
                            let end = if failed {
                                WorkerState::Failed
                            } else {
                                WorkerState::Finished
                            };
                            state.store(end as u8, Ordering::Release);
                            return;
                        }
                    }
                    // A stream that ends without a terminal event violates
                    // the producer contract; seal the bridge regardless
                    None => {
                        bridge.close();
                        state.store(WorkerState::Finished as u8, Ordering::Release);
                        return;
                    }
                }
            }
        }
    }
}

/// Kill the stream, deliver the single cancelled terminal, seal the bridge
async fn settle_cancelled(
    stream: &mut crate::agent::AgentStream,
    bridge: &BridgeSender,
    state: &AtomicU8,
) {
    stream.abort().await;
    bridge.push(StreamEvent::cancelled_error("stream cancelled"));
    bridge.close();
    state.store(WorkerState::Cancelled as u8, Ordering::Release);
}
