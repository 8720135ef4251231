//! Line codec for worker communication.
//!
//! Uses LinesCodec for framing + serde_json for serialization.
//! Undecodable lines are surfaced as [`WorkerLine::Malformed`] instead of an
//! error so that a misbehaving worker can never end the stream on its own.

use std::io;
use std::marker::PhantomData;

use serde::Serialize;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::protocol::{DEFAULT_READY_SENTINEL, WorkerResponse};

/// Default cap on a single line from the worker (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One classified line read from the worker's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerLine {
    /// The readiness sentinel.
    Ready,
    Response(WorkerResponse),
    /// Anything that is neither the sentinel nor a valid response.
    Malformed { line: String, error: String },
}

/// Codec that frames messages by newline and serializes with JSON.
pub struct LineJsonCodec<T> {
    inner: LinesCodec,
    sentinel: String,
    _phantom: PhantomData<T>,
}

impl<T> Default for LineJsonCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_READY_SENTINEL, DEFAULT_MAX_LINE_BYTES)
    }
}

impl<T> LineJsonCodec<T> {
    pub fn new(sentinel: impl Into<String>, max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            sentinel: sentinel.into(),
            _phantom: PhantomData,
        }
    }

    fn classify(&self, line: String) -> WorkerLine {
        let trimmed = line.trim();
        if trimmed == self.sentinel {
            return WorkerLine::Ready;
        }
        match serde_json::from_str::<WorkerResponse>(trimmed) {
            Ok(response) => WorkerLine::Response(response),
            Err(e) => WorkerLine::Malformed {
                line,
                error: e.to_string(),
            },
        }
    }

    /// Map a LinesCodec result, turning per-line failures into `Malformed`.
    fn map_frame(
        &self,
        frame: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Option<WorkerLine>>, io::Error> {
        match frame {
            Ok(Some(line)) if line.trim().is_empty() => Ok(Some(None)),
            Ok(Some(line)) => Ok(Some(Some(self.classify(line)))),
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Some(WorkerLine::Malformed {
                    line: String::new(),
                    error: "line exceeds maximum length".to_string(),
                })))
            }
            // LinesCodec has already consumed the offending line.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Some(WorkerLine::Malformed {
                    line: String::new(),
                    error: e.to_string(),
                })))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl<T> Decoder for LineJsonCodec<T> {
    type Item = WorkerLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let frame = self.inner.decode(src);
            match self.map_frame(frame)? {
                Some(Some(line)) => return Ok(Some(line)),
                // blank line, keep going
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let frame = self.inner.decode_eof(src);
            match self.map_frame(frame)? {
                Some(Some(line)) => return Ok(Some(line)),
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for LineJsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding line");
        self.inner.encode(json, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidInput, "line exceeds maximum length")
            }
        })
    }
}
