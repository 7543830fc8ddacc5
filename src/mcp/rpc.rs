//! JSON-RPC 2.0 envelope types and error codes
//!
//! Provides the request/response wire schema shared by every transport, plus
//! best-effort id recovery for payloads that fail to parse.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Id used for error responses when the request id cannot be recovered.
pub const UNKNOWN_REQUEST_ID: i64 = -1;

static RAW_ID_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""id"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)"#).ok()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// A request id, echoed back verbatim. Any JSON number is accepted,
/// including fractions and values beyond the `i64` range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
}

impl RequestId {
    pub fn unknown() -> Self {
        Self::from(UNKNOWN_REQUEST_ID)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(Self::Number(number.clone())),
            Value::String(text) => Some(Self::String(text.clone())),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, id: Option<RequestId>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            id,
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn has_supported_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Either half of a response; a response never carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    #[cfg(test)]
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(error) => Some(error),
        }
    }
}

/// Recovers the `id` of a payload that failed to parse as a [`Request`].
///
/// Well-formed JSON with an ill-typed shape is read structurally; anything
/// else falls back to a textual scan for an `"id"` member.
pub fn recover_request_id(raw: &str) -> Option<RequestId> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value.get("id").and_then(RequestId::from_value);
    }

    let pattern = RAW_ID_PATTERN.as_ref()?;
    let token = pattern.captures(raw)?.get(1)?.as_str();
    if token.starts_with('"') {
        return serde_json::from_str::<String>(token)
            .ok()
            .map(RequestId::String);
    }

    serde_json::from_str::<Number>(token)
        .ok()
        .map(RequestId::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_codes_match_json_rpc() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
    }

    #[test]
    fn success_response_serializes_result_only() {
        let response = Response::success(Some(RequestId::from(7)), json!({}));

        let value = serde_json::to_value(&response).expect("serialize response");
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 7, "result": {}}));
    }

    #[test]
    fn error_response_serializes_error_only() {
        let response = Response::failure(
            Some(RequestId::String("abc".to_string())),
            ErrorObject::new(ErrorCode::MethodNotFound, "Method nope not found"),
        );

        let value = serde_json::to_value(&response).expect("serialize response");
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": "abc",
                "error": {"code": -32601, "message": "Method nope not found"}
            })
        );
    }

    #[test]
    fn missing_id_is_notification() {
        let request: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .expect("parse notification");
        assert!(request.is_notification());

        let request: Request = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":null}"#)
            .expect("parse null id");
        assert!(request.is_notification());
    }

    #[test]
    fn missing_version_is_unsupported() {
        let request: Request =
            serde_json::from_str(r#"{"method":"ping","id":1}"#).expect("parse request");
        assert!(!request.has_supported_version());
        assert_eq!(request.id, Some(RequestId::from(1)));
    }

    #[test]
    fn recovers_id_from_truncated_json() {
        assert_eq!(
            recover_request_id(r#"{"jsonrpc":"2.0","id":42,"method":"tools/li"#),
            Some(RequestId::from(42))
        );
        assert_eq!(
            recover_request_id(r#"{"id": "req-\"7\"", "method": }"#),
            Some(RequestId::String("req-\"7\"".to_string()))
        );
    }

    #[test]
    fn recovers_id_from_ill_typed_request() {
        assert_eq!(
            recover_request_id(r#"{"jsonrpc":"2.0","id":"x1","method":5}"#),
            Some(RequestId::String("x1".to_string()))
        );
    }

    #[test]
    fn fractional_and_large_ids_are_echoed_exactly() {
        let request: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#)
                .expect("parse fractional id");
        let response = Response::success(request.id, json!({}));
        assert_eq!(
            serde_json::to_string(&response).expect("serialize response"),
            r#"{"jsonrpc":"2.0","id":1.5,"result":{}}"#
        );

        let request: Request = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":18446744073709551615,"method":"ping"}"#,
        )
        .expect("parse u64 id");
        let response = Response::success(request.id, json!({}));
        assert_eq!(
            serde_json::to_string(&response).expect("serialize response"),
            r#"{"jsonrpc":"2.0","id":18446744073709551615,"result":{}}"#
        );
    }

    #[test]
    fn recovers_non_integer_ids_from_truncated_json() {
        assert_eq!(
            recover_request_id(r#"{"jsonrpc":"2.0","id":2.25,"method":"#),
            Some(RequestId::Number(Number::from_f64(2.25).expect("finite")))
        );
        assert_eq!(
            recover_request_id(r#"{"id":18446744073709551615,"method":"#),
            Some(RequestId::Number(u64::MAX.into()))
        );
    }

    #[test]
    fn unrecoverable_id_is_none() {
        assert_eq!(recover_request_id("not json at all"), None);
        assert_eq!(recover_request_id(r#"{"jsonrpc":"2.0","id":true}"#), None);
    }
}
