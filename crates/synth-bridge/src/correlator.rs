//! Request queue and response correlation.
//!
//! Invariants:
//! - at most one request is outstanding (sent, not yet answered)
//! - requests are dispatched strictly in arrival order
//! - a response is only ever delivered to the caller whose id it carries

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::bridge::protocol::{
    RequestId, SynthesisOutput, SynthesisRequest, WorkerRequest, WorkerResponse,
};
use crate::error::BridgeError;

pub type CallResult = Result<SynthesisOutput, BridgeError>;
pub type Reply = oneshot::Sender<CallResult>;

/// A request accepted but not yet sent.
pub(crate) struct QueuedCall {
    pub request: WorkerRequest,
    pub reply: Reply,
}

impl QueuedCall {
    pub fn new(payload: SynthesisRequest, reply: Reply) -> Self {
        Self {
            request: WorkerRequest::new(RequestId::new(), payload),
            reply,
        }
    }
}

/// The single request currently sent to the worker.
pub(crate) struct PendingCall {
    pub request_id: RequestId,
    pub reply: Reply,
    pub dispatched_at: Instant,
    pub deadline: Option<tokio::time::Instant>,
}

/// What happened to a decoded response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    Delivered { request_id: RequestId, success: bool },
    /// Caller had gone away; the call is finished regardless.
    CallerGone { request_id: RequestId },
    /// Nothing outstanding, or the id does not match the outstanding call.
    Unmatched,
}

#[derive(Default)]
pub(crate) struct Correlator {
    queue: VecDeque<QueuedCall>,
    in_flight: Option<PendingCall>,
    completed: u64,
    failed: u64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, call: QueuedCall) {
        tracing::debug!(request_id = %call.request.request_id, queued = self.queue.len() + 1, "Request queued");
        self.queue.push_back(call);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn in_flight_deadline(&self) -> Option<tokio::time::Instant> {
        self.in_flight.as_ref().and_then(|p| p.deadline)
    }

    pub fn in_flight_id(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|p| p.request_id)
    }

    /// Pop the next request and mark it outstanding.
    ///
    /// Returns `None` while busy or when the queue is empty. Callers that
    /// already dropped their receiver are discarded without being sent.
    pub fn next_dispatch(
        &mut self,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<WorkerRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        while let Some(call) = self.queue.pop_front() {
            if call.reply.is_closed() {
                tracing::debug!(request_id = %call.request.request_id, "Caller gone before dispatch, skipping");
                continue;
            }
            self.in_flight = Some(PendingCall {
                request_id: call.request.request_id,
                reply: call.reply,
                dispatched_at: Instant::now(),
                deadline,
            });
            return Some(call.request);
        }
        None
    }

    /// Route a decoded response to the outstanding caller.
    pub fn complete(&mut self, response: WorkerResponse) -> Completion {
        let matches = self
            .in_flight
            .as_ref()
            .is_some_and(|p| p.request_id.to_string() == response.request_id);
        if !matches {
            tracing::warn!(
                response_id = %response.request_id,
                in_flight = ?self.in_flight_id().map(|id| id.to_string()),
                "Dropping response that does not match the outstanding request"
            );
            return Completion::Unmatched;
        }
        let Some(pending) = self.in_flight.take() else {
            return Completion::Unmatched;
        };

        let request_id = pending.request_id;
        let success = response.is_success();
        let elapsed = pending.dispatched_at.elapsed();
        let result = if success {
            self.completed += 1;
            tracing::info!(target: "synth_bridge::call", %request_id, ?elapsed, "Synthesis succeeded");
            Ok(SynthesisOutput {
                request_id,
                fields: response.fields,
            })
        } else {
            self.failed += 1;
            let message = response.error_message();
            tracing::info!(target: "synth_bridge::call", %request_id, ?elapsed, error = %message, "Synthesis failed");
            Err(BridgeError::WorkerReported(message))
        };

        if pending.reply.send(result).is_err() {
            tracing::debug!(%request_id, "Caller dropped before response arrived");
            return Completion::CallerGone { request_id };
        }
        Completion::Delivered {
            request_id,
            success,
        }
    }

    /// Fail only the outstanding call (send failure, call timeout).
    pub fn fail_in_flight(&mut self, error: BridgeError) -> Option<RequestId> {
        let pending = self.in_flight.take()?;
        self.failed += 1;
        tracing::warn!(target: "synth_bridge::call", request_id = %pending.request_id, error = %error, "Request failed");
        let _ = pending.reply.send(Err(error));
        Some(pending.request_id)
    }

    /// Fail the outstanding call and every queued call with the same error.
    pub fn fail_all(&mut self, error: &BridgeError) -> usize {
        let mut count = 0;
        if let Some(pending) = self.in_flight.take() {
            let _ = pending.reply.send(Err(error.clone()));
            count += 1;
        }
        for call in self.queue.drain(..) {
            let _ = call.reply.send(Err(error.clone()));
            count += 1;
        }
        self.failed += count as u64;
        if count > 0 {
            tracing::warn!(count, error = %error, "Failed all pending requests");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(text: &str) -> (QueuedCall, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        (QueuedCall::new(SynthesisRequest::new(text), tx), rx)
    }

    fn success(id: RequestId, extra: serde_json::Value) -> WorkerResponse {
        let mut fields = serde_json::Map::new();
        fields.insert("echo".to_string(), extra);
        WorkerResponse {
            status: crate::bridge::protocol::ResponseStatus::Success,
            request_id: id.to_string(),
            fields,
        }
    }

    #[test]
    fn dispatches_in_fifo_order_one_at_a_time() {
        let mut c = Correlator::new();
        let (a, _rx_a) = call("a");
        let (b, _rx_b) = call("b");
        c.enqueue(a);
        c.enqueue(b);

        let first = c.next_dispatch(None).unwrap();
        assert_eq!(first.payload.text, "a");
        assert!(c.is_busy());
        assert!(c.next_dispatch(None).is_none(), "second dispatch while busy");
        assert_eq!(c.queued(), 1);

        c.complete(success(first.request_id, json!("a")));
        let second = c.next_dispatch(None).unwrap();
        assert_eq!(second.payload.text, "b");
    }

    #[tokio::test]
    async fn response_reaches_matching_caller() {
        let mut c = Correlator::new();
        let (a, rx_a) = call("hello");
        c.enqueue(a);
        let req = c.next_dispatch(None).unwrap();

        let outcome = c.complete(success(req.request_id, json!("hello")));
        assert_eq!(
            outcome,
            Completion::Delivered {
                request_id: req.request_id,
                success: true
            }
        );
        let output = rx_a.await.unwrap().unwrap();
        assert_eq!(output.request_id, req.request_id);
        assert_eq!(output.get("echo"), Some(&json!("hello")));
        assert!(!c.is_busy());
        assert_eq!(c.completed(), 1);
    }

    #[tokio::test]
    async fn error_response_fails_only_that_caller() {
        let mut c = Correlator::new();
        let (a, rx_a) = call("a");
        let (b, mut rx_b) = call("b");
        c.enqueue(a);
        c.enqueue(b);
        let req = c.next_dispatch(None).unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("error".to_string(), json!("unknown voice"));
        c.complete(WorkerResponse {
            status: crate::bridge::protocol::ResponseStatus::Error,
            request_id: req.request_id.to_string(),
            fields,
        });

        assert_eq!(
            rx_a.await.unwrap(),
            Err(BridgeError::WorkerReported("unknown voice".to_string()))
        );
        assert!(rx_b.try_recv().is_err(), "b must still be waiting");
        assert_eq!(c.queued(), 1);
        assert_eq!(c.failed(), 1);
    }

    #[tokio::test]
    async fn mismatched_id_is_dropped() {
        let mut c = Correlator::new();
        let (a, mut rx_a) = call("a");
        c.enqueue(a);
        let req = c.next_dispatch(None).unwrap();

        let outcome = c.complete(success(RequestId::new(), json!("stale")));
        assert_eq!(outcome, Completion::Unmatched);
        assert!(c.is_busy());
        assert!(rx_a.try_recv().is_err());

        c.complete(success(req.request_id, json!("a")));
        assert!(rx_a.await.unwrap().is_ok());
    }

    #[test]
    fn response_with_nothing_outstanding_is_dropped() {
        let mut c = Correlator::new();
        assert_eq!(
            c.complete(success(RequestId::new(), json!(null))),
            Completion::Unmatched
        );
    }

    #[tokio::test]
    async fn fail_in_flight_keeps_queue() {
        let mut c = Correlator::new();
        let (a, rx_a) = call("a");
        let (b, _rx_b) = call("b");
        c.enqueue(a);
        c.enqueue(b);
        c.next_dispatch(None).unwrap();

        c.fail_in_flight(BridgeError::SendFailure("broken pipe".into()));
        assert!(matches!(
            rx_a.await.unwrap(),
            Err(BridgeError::SendFailure(_))
        ));
        assert!(!c.is_busy());
        assert_eq!(c.next_dispatch(None).unwrap().payload.text, "b");
    }

    #[tokio::test]
    async fn fail_all_reaches_pending_and_queued() {
        let mut c = Correlator::new();
        let mut receivers = Vec::new();
        for text in ["a", "b", "c"] {
            let (q, rx) = call(text);
            c.enqueue(q);
            receivers.push(rx);
        }
        c.next_dispatch(None).unwrap();

        let err = BridgeError::terminated("worker exited with code 1");
        assert_eq!(c.fail_all(&err), 3);
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Err(err.clone()));
        }
        assert!(!c.is_busy());
        assert_eq!(c.queued(), 0);
    }

    #[test]
    fn dropped_callers_are_skipped_at_dispatch() {
        let mut c = Correlator::new();
        let (a, rx_a) = call("a");
        let (b, _rx_b) = call("b");
        c.enqueue(a);
        c.enqueue(b);
        drop(rx_a);

        assert_eq!(c.next_dispatch(None).unwrap().payload.text, "b");
    }

    #[test]
    fn caller_gone_still_clears_busy() {
        let mut c = Correlator::new();
        let (a, rx_a) = call("a");
        c.enqueue(a);
        let req = c.next_dispatch(None).unwrap();
        drop(rx_a);

        assert_eq!(
            c.complete(success(req.request_id, json!("a"))),
            Completion::CallerGone {
                request_id: req.request_id
            }
        );
        assert!(!c.is_busy());
    }

    #[test]
    fn deadline_is_tracked() {
        let mut c = Correlator::new();
        let (a, _rx) = call("a");
        c.enqueue(a);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        c.next_dispatch(Some(deadline));
        assert_eq!(c.in_flight_deadline(), Some(deadline));
    }
}
