//! Wire protocol types for host-worker communication.
//!
//! One JSON object per line in each direction:
//! - **Host → Worker** (stdin): `WorkerRequest` = `requestId` + synthesis payload
//! - **Worker → Host** (stdout): `WorkerResponse` = `status` + `requestId` + result fields
//!
//! Before any JSON traffic the worker prints a literal readiness sentinel line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default readiness sentinel printed by the worker once its model is loaded.
pub const DEFAULT_READY_SENTINEL: &str = "READY";

/// Correlation identifier for one request/response pair.
///
/// UUID v4 so that rapid concurrent calls can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied synthesis payload.
///
/// Only `text` is required. Anything in `extra` is passed through to the
/// worker untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Attach an extra field forwarded verbatim to the worker.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Request line sent to the worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub payload: SynthesisRequest,
}

impl WorkerRequest {
    pub fn new(request_id: RequestId, payload: SynthesisRequest) -> Self {
        Self {
            request_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response line received from the worker.
///
/// `request_id` is kept as a raw string: a worker echoing a malformed id is a
/// protocol anomaly for the correlator, not a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub status: ResponseStatus,
    pub request_id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl WorkerResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Error text reported by the worker (`error`, then `message`).
    pub fn error_message(&self) -> String {
        ["error", "message"]
            .iter()
            .find_map(|key| match self.fields.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .unwrap_or_else(|| "worker reported an error without a message".to_string())
    }
}

/// Successful result delivered to a caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisOutput {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SynthesisOutput {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Path of the generated artifact, if the worker reported one.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.fields
            .get("outputPath")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_request_id() -> RequestId {
        RequestId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    #[test]
    fn request_serializes_camel_case() {
        let req = WorkerRequest::new(
            test_request_id(),
            SynthesisRequest::new("hello")
                .with_voice("af_heart")
                .with_output_path("/tmp/out/hello.wav"),
        );
        insta::assert_json_snapshot!(req, @r#"
        {
          "requestId": "550e8400-e29b-41d4-a716-446655440000",
          "text": "hello",
          "voice": "af_heart",
          "outputPath": "/tmp/out/hello.wav"
        }
        "#);
    }

    #[test]
    fn request_omits_unset_optionals() {
        let req = WorkerRequest::new(test_request_id(), SynthesisRequest::new("hi"));
        let line = serde_json::to_string(&req).unwrap();
        assert_eq!(
            line,
            r#"{"requestId":"550e8400-e29b-41d4-a716-446655440000","text":"hi"}"#
        );
    }

    #[test]
    fn request_passes_extra_fields_through() {
        let req = WorkerRequest::new(
            test_request_id(),
            SynthesisRequest::new("hi").with_field("speed", json!(1.25)),
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["speed"], json!(1.25));
        assert_eq!(value["text"], json!("hi"));
    }

    #[test]
    fn success_response_parses() {
        let resp: WorkerResponse = serde_json::from_str(
            r#"{"status":"success","requestId":"abc","outputPath":"/tmp/a.wav","duration":1.5}"#,
        )
        .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.request_id, "abc");
        assert_eq!(resp.fields["outputPath"], json!("/tmp/a.wav"));
        assert_eq!(resp.fields["duration"], json!(1.5));
    }

    #[test]
    fn error_response_message_lookup() {
        let resp: WorkerResponse =
            serde_json::from_str(r#"{"status":"error","requestId":"abc","error":"no voice"}"#)
                .unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.error_message(), "no voice");

        let resp: WorkerResponse =
            serde_json::from_str(r#"{"status":"error","requestId":"abc","message":"oom"}"#)
                .unwrap();
        assert_eq!(resp.error_message(), "oom");

        let resp: WorkerResponse =
            serde_json::from_str(r#"{"status":"error","requestId":"abc"}"#).unwrap();
        assert_eq!(
            resp.error_message(),
            "worker reported an error without a message"
        );
    }

    #[test]
    fn response_with_unknown_status_is_rejected() {
        let result = serde_json::from_str::<WorkerResponse>(
            r#"{"status":"pending","requestId":"abc"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn response_without_request_id_is_rejected() {
        let result = serde_json::from_str::<WorkerResponse>(r#"{"status":"success"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn output_reports_path() {
        let mut fields = serde_json::Map::new();
        fields.insert("outputPath".to_string(), json!("/tmp/x.wav"));
        let output = SynthesisOutput {
            request_id: test_request_id(),
            fields,
        };
        assert_eq!(output.output_path(), Some(PathBuf::from("/tmp/x.wav")));
        insta::assert_json_snapshot!(output, @r#"
        {
          "requestId": "550e8400-e29b-41d4-a716-446655440000",
          "outputPath": "/tmp/x.wav"
        }
        "#);
    }

    #[test]
    fn request_id_display_matches_uuid() {
        let id = test_request_id();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
