//! Lifecycle state of the bridge and its worker.

use serde::{Deserialize, Serialize};

/// Lifecycle of the single worker owned by a bridge.
///
/// `Uninitialized → Initializing → Ready → Terminated`. A failed
/// initialization falls back to `Uninitialized`; `Terminated` is final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// No worker process exists
    #[default]
    Uninitialized,
    /// Worker spawned, waiting for the readiness sentinel
    Initializing,
    /// Accepting requests
    Ready,
    /// Worker exited or was shut down
    Terminated,
}

impl LifecycleState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the bridge, answered by the actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSnapshot {
    pub state: LifecycleState,
    /// OS pid of the live worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,
    /// When the worker became ready (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<String>,
    pub queued: usize,
    pub in_flight: bool,
    pub completed: u64,
    pub failed: u64,
}

impl BridgeSnapshot {
    pub fn idle(state: LifecycleState) -> Self {
        Self {
            state,
            worker_pid: None,
            ready_at: None,
            queued: 0,
            in_flight: false,
            completed: 0,
            failed: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight || self.queued > 0
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_uninitialized() {
        assert_eq!(LifecycleState::default(), LifecycleState::Uninitialized);
        assert!(!LifecycleState::default().is_ready());
    }

    #[test]
    fn only_ready_is_ready() {
        assert!(LifecycleState::Ready.is_ready());
        assert!(!LifecycleState::Initializing.is_ready());
        assert!(!LifecycleState::Terminated.is_ready());
        assert!(LifecycleState::Terminated.is_terminal());
    }

    #[test]
    fn state_serializes_screaming_snake_case() {
        insta::assert_json_snapshot!(
            [
                LifecycleState::Uninitialized,
                LifecycleState::Initializing,
                LifecycleState::Ready,
                LifecycleState::Terminated,
            ],
            @r#"
        [
          "UNINITIALIZED",
          "INITIALIZING",
          "READY",
          "TERMINATED"
        ]
        "#
        );
    }

    #[test]
    fn state_deserializes() {
        assert_eq!(
            serde_json::from_str::<LifecycleState>("\"READY\"").unwrap(),
            LifecycleState::Ready
        );
    }

    #[test]
    fn snapshot_busy() {
        let mut snap = BridgeSnapshot::idle(LifecycleState::Ready);
        assert!(!snap.is_busy());
        snap.queued = 2;
        assert!(snap.is_busy());
    }

    #[test]
    fn ready_at_is_rfc3339() {
        let ts = now_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
