//! Line protocol between the host and the synthesis worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (WorkerRequest/WorkerResponse, RequestId)
//! - **codec**: Newline-delimited JSON codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
