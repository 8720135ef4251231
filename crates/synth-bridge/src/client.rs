//! SynthBridge: the only entry point the host application sees.
//!
//! Handles are cheap to clone. When the last handle is dropped the actor
//! shuts the worker down.

use tokio::sync::{mpsc, oneshot, watch};

use crate::actor::{BridgeActor, Command};
use crate::bridge::protocol::{SynthesisOutput, SynthesisRequest};
use crate::config::BridgeConfig;
use crate::correlator::QueuedCall;
use crate::error::BridgeError;
use crate::lifecycle::{BridgeSnapshot, LifecycleState};

/// Handle to one bridge (one worker, one in-flight call).
#[derive(Clone)]
pub struct SynthBridge {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LifecycleState>,
}

impl std::fmt::Debug for SynthBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthBridge")
            .field("state", &self.state())
            .finish()
    }
}

impl SynthBridge {
    /// Create a bridge and start its actor task.
    ///
    /// Must be called from within a tokio runtime. No worker is spawned until
    /// `initialize()` or the first `call()`.
    pub fn new(config: BridgeConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::Uninitialized);

        let actor = BridgeActor::new(config, commands_rx, state_tx);
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Spawn the worker and wait for its readiness sentinel.
    ///
    /// Idempotent: concurrent callers share one attempt and one worker.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        if self.is_ready() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Initialize { reply })?;
        rx.await.map_err(|_| actor_gone())?
    }

    /// Submit a synthesis request and wait for its result.
    ///
    /// Initializes the worker first if needed. Requests are served strictly
    /// in submission order.
    pub async fn call(&self, request: SynthesisRequest) -> Result<SynthesisOutput, BridgeError> {
        if self.state().is_terminal() {
            return Err(BridgeError::terminated("bridge is terminated"));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Call(QueuedCall::new(request, reply)))?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> BridgeSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Snapshot { reply }).is_err() {
            return BridgeSnapshot::idle(self.state());
        }
        rx.await
            .unwrap_or_else(|_| BridgeSnapshot::idle(self.state()))
    }

    /// Stop the worker and fail anything still pending. Idempotent.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, cmd: Command) -> Result<(), BridgeError> {
        self.commands.send(cmd).map_err(|_| actor_gone())
    }
}

fn actor_gone() -> BridgeError {
    BridgeError::terminated("bridge actor stopped")
}
