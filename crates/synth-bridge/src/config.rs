//! Bridge configuration.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::codec::DEFAULT_MAX_LINE_BYTES;
use crate::bridge::protocol::DEFAULT_READY_SENTINEL;
use crate::supervisor::{CommandSpawner, WorkerSpawner};

/// How to launch the worker executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Launcher artifact shipped alongside the host. Must exist at spawn time.
    pub launcher: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
            launcher: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Run `program launcher args...`, e.g. `python3 /opt/tts/worker.py`.
    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    /// Full argument vector passed to the program (launcher first).
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        if let Some(ref launcher) = self.launcher {
            argv.push(launcher.to_string_lossy().into_owned());
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct BridgeConfig {
    pub command: WorkerCommand,
    pub ready_sentinel: String,
    pub ready_timeout: Duration,
    /// Per-call deadline. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub output_dir: Option<PathBuf>,
    pub output_extension: String,
    pub max_line_bytes: usize,
    pub spawner: Arc<dyn WorkerSpawner>,
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("command", &self.command)
            .field("ready_sentinel", &self.ready_sentinel)
            .field("ready_timeout", &self.ready_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("output_dir", &self.output_dir)
            .field("output_extension", &self.output_extension)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish_non_exhaustive()
    }
}

impl BridgeConfig {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            ready_sentinel: DEFAULT_READY_SENTINEL.to_string(),
            ready_timeout: Duration::from_secs(30),
            call_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            output_dir: None,
            output_extension: "wav".to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            spawner: Arc::new(CommandSpawner),
        }
    }

    pub fn with_ready_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.ready_sentinel = sentinel.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_output_extension(mut self, ext: impl Into<String>) -> Self {
        self.output_extension = ext.into();
        self
    }

    pub fn with_max_line_bytes(mut self, n: usize) -> Self {
        self.max_line_bytes = n;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Build from `SYNTH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let program =
            get("SYNTH_WORKER_PROGRAM").ok_or(ConfigError::Missing("SYNTH_WORKER_PROGRAM"))?;
        let mut command = WorkerCommand::new(program);
        if let Some(args) = get("SYNTH_WORKER_ARGS") {
            command = command.args(args.split_whitespace());
        }
        if let Some(launcher) = get("SYNTH_WORKER_LAUNCHER") {
            command = command.with_launcher(launcher);
        }
        if let Some(dir) = get("SYNTH_WORKER_DIR") {
            command = command.current_dir(dir);
        }

        let mut config = Self::new(command);
        if let Some(sentinel) = get("SYNTH_READY_SENTINEL") {
            config.ready_sentinel = sentinel.trim().to_string();
        }
        if let Some(v) = get("SYNTH_READY_TIMEOUT_SECS") {
            config.ready_timeout = parse_secs("SYNTH_READY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SYNTH_CALL_TIMEOUT_SECS") {
            config.call_timeout = Some(parse_secs("SYNTH_CALL_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SYNTH_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = parse_secs("SYNTH_SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Some(dir) = get("SYNTH_OUTPUT_DIR") {
            config.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(ext) = get("SYNTH_OUTPUT_EXT") {
            config.output_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(v) = get("SYNTH_MAX_LINE_BYTES") {
            config.max_line_bytes = v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "SYNTH_MAX_LINE_BYTES",
                    value: v.clone(),
                })?;
        }
        Ok(config)
    }

    /// Output path assigned to a request that did not name one.
    pub(crate) fn default_output_path(&self, request_id: &str) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", request_id, self.output_extension)))
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
}
