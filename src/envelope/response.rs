//! Response envelope and error description types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CallKey;

static NULL: Value = Value::Null;

/// Category of a per-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No handler is registered under the requested method name
    UnknownMethod,
    /// The arguments could not be decoded into the handler's parameters
    InvalidArguments,
    /// The handler returned an error or panicked
    HandlerFailed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownMethod => "unknown method",
            ErrorKind::InvalidArguments => "invalid arguments",
            ErrorKind::HandlerFailed => "handler failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable description of why a call failed.
///
/// The message is never empty: constructing one with an empty message falls
/// back to the kind's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            kind.as_str().to_string()
        } else {
            message
        };
        Self { kind, message }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            ErrorKind::UnknownMethod,
            format!("no handler registered for method '{}'", method),
        )
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message)
    }

    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerFailed, message)
    }
}

/// Outcome of a single call.
///
/// Exactly one of `result` and `error` is meaningful, selected by `success`.
/// The constructors enforce this and deserialization rejects envelopes that
/// violate it.
///
/// # Wire Format
///
/// ```json
/// {"key": "01J...", "success": true, "result": "worker: BLABLA"}
/// {"key": "01J...", "success": false, "error": {"kind": "unknown_method", "message": "..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse")]
pub struct Response {
    key: CallKey,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<CallError>,
}

impl Response {
    /// Successful response carrying the handler's return value.
    pub fn ok(key: CallKey, result: Value) -> Self {
        Self {
            key,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying the error description.
    pub fn failure(key: CallKey, error: CallError) -> Self {
        Self {
            key,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn key(&self) -> CallKey {
        self.key
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The return value, if the call succeeded.
    ///
    /// A handler that returned `null` yields `Some(&Value::Null)`.
    pub fn result(&self) -> Option<&Value> {
        if self.success {
            Some(self.result.as_ref().unwrap_or(&NULL))
        } else {
            None
        }
    }

    /// The failure description, if the call failed.
    pub fn error(&self) -> Option<&CallError> {
        self.error.as_ref()
    }

    /// Convert into a `Result`, for callers that re-raise the embedded error.
    pub fn into_result(self) -> Result<Value, CallError> {
        match (self.success, self.result, self.error) {
            (true, result, _) => Ok(result.unwrap_or(Value::Null)),
            (false, _, Some(error)) => Err(error),
            (false, _, None) => Err(CallError::handler_failed("call failed")),
        }
    }
}

/// Unvalidated wire shape of a response.
#[derive(Deserialize)]
struct RawResponse {
    key: CallKey,
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CallError>,
}

impl TryFrom<RawResponse> for Response {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        match (raw.success, raw.result, raw.error) {
            (true, result, None) => Ok(Response::ok(raw.key, result.unwrap_or(Value::Null))),
            (true, _, Some(_)) => Err("successful response must not carry an error".to_string()),
            (false, None, Some(error)) => Ok(Response::failure(
                raw.key,
                CallError::new(error.kind, error.message),
            )),
            (false, Some(_), _) => Err("failed response must not carry a result".to_string()),
            (false, None, None) => Err("failed response must carry an error".to_string()),
        }
    }
}

/// Message written by the worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Sent once after the handler factory succeeded.
    Ready { pid: u32, methods: Vec<String> },
    /// Outcome of one call, in the order calls were received.
    Response(Response),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn ok_response_exposes_result_only() {
        let key = CallKey::new();
        let response = Response::ok(key, json!("worker: BLABLA"));

        assert!(response.is_success());
        assert_eq!(response.key(), key);
        assert_eq!(response.result(), Some(&json!("worker: BLABLA")));
        assert!(response.error().is_none());
    }

    #[test]
    fn failure_response_exposes_error_only() {
        let response = Response::failure(CallKey::new(), CallError::unknown_method("nope"));

        assert!(!response.is_success());
        assert!(response.result().is_none());
        let error = response.error().unwrap();
        assert_eq!(error.kind, ErrorKind::UnknownMethod);
        assert!(error.message.contains("nope"));
    }

    #[test]
    fn null_result_survives_the_wire() {
        let response = Response::ok(CallKey::new(), Value::Null);
        let text = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&text).unwrap();

        assert!(back.is_success());
        assert_eq!(back.result(), Some(&Value::Null));
        assert_eq!(back.into_result(), Ok(Value::Null));
    }

    #[test]
    fn empty_error_message_falls_back_to_kind() {
        let error = CallError::handler_failed("   ");
        assert_eq!(error.message, "handler failed");
        assert_eq!(error.to_string(), "handler failed: handler failed");
    }

    #[test]
    fn into_result_returns_embedded_error() {
        let error = CallError::invalid_arguments("missing field `text`");
        let response = Response::failure(CallKey::new(), error.clone());
        assert_eq!(response.into_result(), Err(error));
    }

    #[rstest]
    #[case::success_with_error(json!({"success": true, "error": {"kind": "handler_failed", "message": "x"}}))]
    #[case::failure_with_result(json!({"success": false, "result": 1, "error": {"kind": "handler_failed", "message": "x"}}))]
    #[case::failure_without_error(json!({"success": false}))]
    fn inconsistent_envelopes_are_rejected(#[case] mut raw: Value) {
        raw["key"] = json!(CallKey::new().to_string());
        let result = serde_json::from_value::<Response>(raw);
        assert!(result.is_err(), "should reject: {:?}", result);
    }

    #[test]
    fn worker_message_is_tagged_by_type() {
        let ready = WorkerMessage::Ready {
            pid: 42,
            methods: vec!["uppercase".to_string()],
        };
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["pid"], 42);

        let key = CallKey::new();
        let message = WorkerMessage::Response(Response::ok(key, json!(3)));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["key"], json!(key.to_string()));
        assert_eq!(value["success"], true);
        assert_eq!(value["result"], 3);
        assert!(value.get("error").is_none());

        let back: WorkerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
