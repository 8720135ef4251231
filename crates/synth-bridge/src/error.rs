//! Error types surfaced to bridge callers.

use std::time::Duration;

/// Failure of a bridge operation.
///
/// `Clone` because process-wide failures (timeout, spawn failure, termination)
/// are broadcast to every pending and queued caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("worker did not become ready within {timeout:?}")]
    InitializationTimeout { timeout: Duration },

    #[error("failed to spawn worker: {0}")]
    SpawnFailure(String),

    #[error("worker terminated: {0}")]
    WorkerTerminated(String),

    /// A worker line could not be decoded. Logged and dropped, never
    /// delivered to a caller.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("worker reported error: {0}")]
    WorkerReported(String),

    #[error("failed to send request to worker: {0}")]
    SendFailure(String),

    #[error("worker did not answer within {timeout:?}")]
    CallTimeout { timeout: Duration },

    #[error("io error: {0}")]
    Io(String),
}

impl BridgeError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::WorkerTerminated(reason.into())
    }

    /// True for failures that affect the worker as a whole rather than one call.
    pub fn is_process_wide(&self) -> bool {
        matches!(
            self,
            Self::InitializationTimeout { .. } | Self::SpawnFailure(_) | Self::WorkerTerminated(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("launcher not found: {0}")]
    LauncherMissing(std::path::PathBuf),
    #[error("{0} not captured")]
    StreamNotCaptured(&'static str),
}

impl From<SpawnError> for BridgeError {
    fn from(e: SpawnError) -> Self {
        Self::SpawnFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::InitializationTimeout {
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "worker did not become ready within 30s");

        let err = BridgeError::WorkerReported("unknown voice".to_string());
        assert_eq!(err.to_string(), "worker reported error: unknown voice");

        let err = BridgeError::terminated("exit status: 1");
        assert_eq!(err.to_string(), "worker terminated: exit status: 1");
    }

    #[test]
    fn process_wide_classification() {
        assert!(BridgeError::terminated("x").is_process_wide());
        assert!(BridgeError::SpawnFailure("x".into()).is_process_wide());
        assert!(!BridgeError::SendFailure("x".into()).is_process_wide());
        assert!(!BridgeError::WorkerReported("x".into()).is_process_wide());
    }

    #[test]
    fn spawn_error_converts() {
        let err: BridgeError =
            SpawnError::LauncherMissing(std::path::PathBuf::from("/opt/tts/launch.py")).into();
        assert_eq!(
            err,
            BridgeError::SpawnFailure("launcher not found: /opt/tts/launch.py".to_string())
        );
    }
}
