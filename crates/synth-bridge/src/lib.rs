//! synth-bridge: drive an out-of-process speech synthesis worker over a
//! line-delimited JSON protocol on its stdin/stdout.

mod actor;
mod client;
mod config;
mod correlator;
mod error;
mod lifecycle;
mod supervisor;

pub mod bridge;
pub mod logging;

pub use client::SynthBridge;

pub use bridge::protocol::{RequestId, SynthesisOutput, SynthesisRequest};
pub use config::{BridgeConfig, ConfigError, WorkerCommand};
pub use error::{BridgeError, SpawnError};
pub use lifecycle::{BridgeSnapshot, LifecycleState};
pub use supervisor::{CommandSpawner, WorkerSpawner};
