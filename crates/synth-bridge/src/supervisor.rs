//! Worker process supervision: spawn, stderr diagnostics, termination.
//!
//! The readiness wait and exit detection run inside the bridge actor, which
//! owns the [`WorkerProcess`] exclusively. Writes to the worker's stdin run on
//! a separate task so a worker that stops reading can never stall the actor.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::LineJsonCodec;
use crate::bridge::protocol::{RequestId, WorkerRequest};
use crate::config::{BridgeConfig, WorkerCommand};
use crate::error::SpawnError;

pub(crate) type WorkerCodec = LineJsonCodec<WorkerRequest>;
pub(crate) type WorkerReader = FramedRead<ChildStdout, WorkerCodec>;

/// Extension point for different worker spawn strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, command: &WorkerCommand) -> Result<Child, SpawnError>;
}

/// Spawns the configured command with piped stdio.
pub struct CommandSpawner;

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self, command: &WorkerCommand) -> Result<Child, SpawnError> {
        if let Some(ref launcher) = command.launcher
            && !launcher.is_file()
        {
            return Err(SpawnError::LauncherMissing(launcher.clone()));
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(command.argv())
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = command.current_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd.spawn()?)
    }
}

/// Result of writing one request line to the worker's stdin.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    pub request_id: RequestId,
    pub result: io::Result<()>,
}

/// Exclusive handle to one running worker.
pub(crate) struct WorkerProcess {
    pub child: Child,
    pub reader: WorkerReader,
    /// Requests handed to the stdin writer task.
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    /// One outcome per request, in order.
    pub writes: mpsc::UnboundedReceiver<WriteOutcome>,
    writer_task: JoinHandle<()>,
    pub pid: Option<u32>,
}

impl WorkerProcess {
    pub fn spawn(config: &BridgeConfig) -> Result<Self, SpawnError> {
        tracing::info!(
            program = %config.command.program.display(),
            args = ?config.command.argv(),
            "Spawning worker subprocess"
        );
        let mut child = config.spawner.spawn(&config.command)?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::StreamNotCaptured("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::StreamNotCaptured("stdout"))?;
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, pid));
        }

        let writer = FramedWrite::new(
            stdin,
            WorkerCodec::new(&config.ready_sentinel, config.max_line_bytes),
        );
        let reader = FramedRead::new(
            stdout,
            WorkerCodec::new(&config.ready_sentinel, config.max_line_bytes),
        );

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_requests(writer, requests_rx, writes_tx));

        tracing::debug!(?pid, "Worker spawned");
        Ok(Self {
            child,
            reader,
            requests: requests_tx,
            writes: writes_rx,
            writer_task,
            pid,
        })
    }

    /// Close stdin, ask the worker to exit, and kill it after `grace`.
    ///
    /// A write still blocked on a full pipe is abandoned.
    pub async fn terminate(self, grace: Duration) {
        let Self {
            mut child,
            reader,
            requests,
            writes,
            writer_task,
            pid,
        } = self;
        drop(requests);
        drop(writes);
        // dropping the task's writer closes stdin
        writer_task.abort();
        drop(reader);

        if let Some(pid) = pid {
            send_sigterm(pid);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(?pid, status = %status, "Worker exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(?pid, error = %e, "Failed to wait for worker");
            }
            Err(_) => {
                tracing::warn!(?pid, ?grace, "Worker did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    tracing::error!(?pid, error = %e, "Failed to kill worker");
                }
            }
        }
    }
}

/// Stdin writer loop: one frame per request, one outcome per frame.
async fn write_requests<W>(
    mut writer: FramedWrite<W, WorkerCodec>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    outcomes: mpsc::UnboundedSender<WriteOutcome>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = requests.recv().await {
        let request_id = request.request_id;
        let result = writer.send(request).await;
        if result.is_err() {
            // never let the remains of a failed frame prefix the next request
            writer.write_buffer_mut().clear();
        }
        if outcomes.send(WriteOutcome { request_id, result }).is_err() {
            break;
        }
    }
    tracing::debug!("Worker stdin writer stopped");
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        // ESRCH: already gone
        tracing::debug!(pid, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// Human-readable reason for a worker exit.
pub(crate) fn exit_reason(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("worker exited with code {}", code);
    }
    match exit_signal(status) {
        Some(signal) => format!("worker killed by signal {}", signal),
        None => format!("worker exited ({})", status),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Log the worker's stderr line by line. Never parsed.
async fn drain_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    tracing::info!(target: "synth_bridge::worker", ?pid, "{}", trimmed);
                }
            }
            Err(e) => {
                tracing::debug!(?pid, error = %e, "Worker stderr read failed");
                break;
            }
        }
    }
    tracing::debug!(?pid, "Worker stderr closed");
}
