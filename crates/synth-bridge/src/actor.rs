//! Bridge actor - owns the worker process and all bridge state.
//!
//! Flow:
//! 1. First Call/Initialize spawns the worker
//! 2. Wait for the readiness sentinel (bounded by `ready_timeout`)
//! 3. Dispatch queued requests one at a time, routing each response back
//! 4. On worker exit: fail every pending and queued call, become Terminated
//!
//! Every state mutation happens on this one task, so the queue, the busy flag
//! and the lifecycle state form a single critical section. The actor never
//! awaits a stdin write; the writer task reports each one back as an event.

use std::io;
use std::process::ExitStatus;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::bridge::codec::WorkerLine;
use crate::bridge::protocol::RequestId;
use crate::config::BridgeConfig;
use crate::correlator::{Completion, Correlator, QueuedCall};
use crate::error::BridgeError;
use crate::lifecycle::{BridgeSnapshot, LifecycleState, now_rfc3339};
use crate::supervisor::{WorkerProcess, WorkerReader, WriteOutcome, exit_reason};

pub(crate) type InitReply = oneshot::Sender<Result<(), BridgeError>>;

/// Requests from façade handles to the actor.
pub(crate) enum Command {
    Initialize { reply: InitReply },
    Call(QueuedCall),
    Snapshot { reply: oneshot::Sender<BridgeSnapshot> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Event {
    Line(Option<io::Result<WorkerLine>>),
    Exited(io::Result<ExitStatus>),
    Written(Option<WriteOutcome>),
    ReadyTimeout,
    CallTimeout,
    Command(Command),
    HandlesDropped,
}

pub(crate) struct BridgeActor {
    config: BridgeConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<LifecycleState>,
    correlator: Correlator,
    worker: Option<WorkerProcess>,
    init_waiters: Vec<InitReply>,
    ready_deadline: Option<Instant>,
    ready_at: Option<String>,
    /// Request handed to the writer task whose outcome has not come back.
    write_pending: Option<RequestId>,
}

impl BridgeActor {
    pub fn new(
        config: BridgeConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<LifecycleState>,
    ) -> Self {
        Self {
            config,
            commands,
            state_tx,
            correlator: Correlator::new(),
            worker: None,
            init_waiters: Vec::new(),
            ready_deadline: None,
            ready_at: None,
            write_pending: None,
        }
    }

    fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Bridge state changed");
        }
    }

    pub async fn run(mut self) {
        loop {
            let ready_deadline = self.ready_deadline;
            let call_deadline = self.correlator.in_flight_deadline();
            let (reader, child, writes) = match self.worker.as_mut() {
                Some(w) => (
                    Some(&mut w.reader),
                    Some(&mut w.child),
                    Some(&mut w.writes),
                ),
                None => (None, None, None),
            };

            let event = tokio::select! {
                biased;

                line = next_line(reader) => Event::Line(line),
                status = wait_exit(child) => Event::Exited(status),
                outcome = next_write(writes) => Event::Written(outcome),
                _ = sleep_until(ready_deadline) => Event::ReadyTimeout,
                _ = sleep_until(call_deadline) => Event::CallTimeout,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => Event::HandlesDropped,
                },
            };

            match event {
                Event::Line(Some(Ok(line))) => self.on_line(line).await,
                Event::Line(Some(Err(e))) => {
                    tracing::error!(error = %e, "Worker stdout read failed");
                    self.on_worker_gone(format!("stdout read failed: {}", e)).await;
                }
                Event::Line(None) => {
                    self.on_worker_gone("worker closed stdout".to_string()).await;
                }
                Event::Exited(Ok(status)) => self.on_worker_gone(exit_reason(&status)).await,
                Event::Exited(Err(e)) => {
                    let reason = format!("failed to wait for worker: {}", e);
                    self.on_worker_gone(reason).await;
                }
                Event::Written(Some(outcome)) => self.on_written(outcome),
                Event::Written(None) => {
                    self.on_worker_gone("stdin writer stopped".to_string()).await;
                }
                Event::ReadyTimeout => {
                    let timeout = self.config.ready_timeout;
                    tracing::error!(?timeout, "Worker did not signal readiness in time");
                    self.fail_initialization(BridgeError::InitializationTimeout { timeout })
                        .await;
                }
                Event::CallTimeout => self.on_call_timeout().await,
                Event::Command(cmd) => self.on_command(cmd).await,
                Event::HandlesDropped => {
                    tracing::debug!("All bridge handles dropped");
                    self.shutdown().await;
                    break;
                }
            }
        }

        tracing::debug!("Bridge actor exiting");
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Initialize { reply } => match self.state() {
                LifecycleState::Ready => {
                    let _ = reply.send(Ok(()));
                }
                LifecycleState::Initializing => self.init_waiters.push(reply),
                LifecycleState::Uninitialized => {
                    self.init_waiters.push(reply);
                    self.begin_initialize().await;
                }
                LifecycleState::Terminated => {
                    let _ = reply.send(Err(terminated_error()));
                }
            },
            Command::Call(mut call) => {
                let state = self.state();
                if state.is_terminal() {
                    let _ = call.reply.send(Err(terminated_error()));
                    return;
                }
                if call.request.payload.output_path.is_none() {
                    call.request.payload.output_path = self
                        .config
                        .default_output_path(&call.request.request_id.to_string());
                }
                self.correlator.enqueue(call);
                match state {
                    LifecycleState::Uninitialized => self.begin_initialize().await,
                    LifecycleState::Ready => self.pump(),
                    _ => {}
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            state: self.state(),
            worker_pid: self.worker.as_ref().and_then(|w| w.pid),
            ready_at: self.ready_at.clone(),
            queued: self.correlator.queued(),
            in_flight: self.correlator.is_busy(),
            completed: self.correlator.completed(),
            failed: self.correlator.failed(),
        }
    }

    async fn begin_initialize(&mut self) {
        self.set_state(LifecycleState::Initializing);

        if let Some(dir) = self.config.output_dir.clone()
            && let Err(e) = tokio::fs::create_dir_all(&dir).await
        {
            let err = BridgeError::Io(format!(
                "failed to create output dir {}: {}",
                dir.display(),
                e
            ));
            self.fail_initialization(err).await;
            return;
        }

        match WorkerProcess::spawn(&self.config) {
            Ok(worker) => {
                tracing::debug!(pid = ?worker.pid, "Waiting for readiness sentinel");
                self.worker = Some(worker);
                self.ready_deadline = Some(Instant::now() + self.config.ready_timeout);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn worker");
                self.fail_initialization(e.into()).await;
            }
        }
    }

    fn become_ready(&mut self) {
        self.ready_deadline = None;
        self.ready_at = Some(now_rfc3339());
        self.set_state(LifecycleState::Ready);
        tracing::info!(pid = ?self.worker.as_ref().and_then(|w| w.pid), "Worker ready");
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Abort an initialization attempt. The bridge returns to Uninitialized so
    /// a later call can try again.
    async fn fail_initialization(&mut self, error: BridgeError) {
        self.ready_deadline = None;
        if let Some(worker) = self.take_worker() {
            worker.terminate(std::time::Duration::ZERO).await;
        }
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.correlator.fail_all(&error);
        self.set_state(LifecycleState::Uninitialized);
    }

    async fn on_line(&mut self, line: WorkerLine) {
        match line {
            WorkerLine::Ready => {
                if self.state() == LifecycleState::Initializing {
                    self.become_ready();
                    self.pump();
                } else {
                    tracing::warn!(state = %self.state(), "Ignoring unexpected readiness sentinel");
                }
            }
            WorkerLine::Response(response) => {
                if !self.state().is_ready() {
                    tracing::warn!(
                        response_id = %response.request_id,
                        state = %self.state(),
                        "Dropping response received before readiness"
                    );
                    return;
                }
                match self.correlator.complete(response) {
                    Completion::Unmatched => return,
                    Completion::Delivered {
                        request_id,
                        success,
                    } => {
                        tracing::trace!(%request_id, success, "Response delivered");
                    }
                    Completion::CallerGone { request_id } => {
                        tracing::trace!(%request_id, "Response discarded, caller gone");
                    }
                }
                self.pump();
            }
            WorkerLine::Malformed { line, error } => {
                let error = BridgeError::ProtocolDecode(error);
                tracing::warn!(
                    error = %error,
                    line = %truncate(&line, 200),
                    "Discarding malformed worker line"
                );
            }
        }
    }

    async fn on_worker_gone(&mut self, reason: String) {
        match self.state() {
            LifecycleState::Initializing => {
                tracing::error!(%reason, "Worker exited before becoming ready");
                self.fail_initialization(BridgeError::WorkerTerminated(reason)).await;
            }
            _ => {
                tracing::warn!(%reason, "Worker terminated");
                self.set_state(LifecycleState::Terminated);
                self.correlator.fail_all(&BridgeError::WorkerTerminated(reason));
                if let Some(worker) = self.take_worker() {
                    worker.terminate(self.config.shutdown_grace).await;
                }
            }
        }
    }

    /// Hand the next queued request to the writer task if the worker is
    /// ready and idle.
    fn pump(&mut self) {
        if !self.state().is_ready() {
            return;
        }
        let Some(worker) = self.worker.as_ref() else {
            return;
        };
        let deadline = self.config.call_timeout.map(|t| Instant::now() + t);
        while let Some(request) = self.correlator.next_dispatch(deadline) {
            let request_id = request.request_id;
            match worker.requests.send(request) {
                Ok(()) => {
                    tracing::trace!(%request_id, "Request handed to stdin writer");
                    self.write_pending = Some(request_id);
                    return;
                }
                Err(_) => {
                    self.correlator.fail_in_flight(BridgeError::SendFailure(
                        "stdin writer stopped".to_string(),
                    ));
                }
            }
        }
    }

    fn on_written(&mut self, outcome: WriteOutcome) {
        let WriteOutcome { request_id, result } = outcome;
        if self.write_pending == Some(request_id) {
            self.write_pending = None;
        }
        match result {
            Ok(()) => {
                tracing::debug!(%request_id, "Request dispatched");
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "Failed to send request");
                if self.correlator.in_flight_id() == Some(request_id) {
                    self.correlator
                        .fail_in_flight(BridgeError::SendFailure(e.to_string()));
                    self.pump();
                }
            }
        }
    }

    async fn on_call_timeout(&mut self) {
        let Some(timeout) = self.config.call_timeout else {
            return;
        };
        let in_flight = self.correlator.in_flight_id();
        if in_flight.is_none() {
            return;
        }
        self.correlator.fail_in_flight(BridgeError::CallTimeout { timeout });

        if self.write_pending.is_some() && self.write_pending == in_flight {
            // A partly written line cannot be recalled; the worker would read
            // it ahead of the next request.
            tracing::error!(?timeout, "Request write did not finish in time");
            self.on_worker_gone("request write timed out".to_string()).await;
            return;
        }
        self.pump();
    }

    fn take_worker(&mut self) -> Option<WorkerProcess> {
        self.write_pending = None;
        self.worker.take()
    }

    async fn shutdown(&mut self) {
        if self.state().is_terminal() && self.worker.is_none() {
            return;
        }
        tracing::info!("Shutting down worker");
        self.set_state(LifecycleState::Terminated);
        self.ready_deadline = None;

        let error = BridgeError::terminated("bridge shut down");
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.correlator.fail_all(&error);

        if let Some(worker) = self.take_worker() {
            worker.terminate(self.config.shutdown_grace).await;
        }
    }
}

fn terminated_error() -> BridgeError {
    BridgeError::terminated("bridge is terminated")
}

async fn next_line(reader: Option<&mut WorkerReader>) -> Option<io::Result<WorkerLine>> {
    match reader {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn next_write(
    writes: Option<&mut mpsc::UnboundedReceiver<WriteOutcome>>,
) -> Option<WriteOutcome> {
    match writes {
        Some(writes) => writes.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_exit(child: Option<&mut tokio::process::Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("héllo", 2), "hé");
    }

    #[test]
    fn terminated_error_is_process_wide() {
        assert!(terminated_error().is_process_wide());
    }
}
