//! JSON-RPC 2.0 wire types
//!
//! These types mirror the envelopes of the JSON-RPC 2.0 specification
//! (https://www.jsonrpc.org/specification):
//!
//! 1. **Request**: a call that expects a response (`id` present, possibly `null`)
//! 2. **Notification**: a request without an `id`; never answered
//! 3. **Response**: exactly one of `result` or `error`, echoing the `id`
//!
//! # Presence vs. null
//!
//! JSON-RPC distinguishes an absent member from a member holding `null`. An
//! absent `id` marks a notification while `"id": null` is a (discouraged) request.
//! Likewise a void method answers with `"result": null`. Both fields use
//! [`deserialize_some`] so that an explicit `null` survives a round trip.

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Keeps an explicit `null` as `Some(null)` instead of collapsing it into `None`
///
/// Used with `#[serde(default)]` so that a missing member still yields `None`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 request ID
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::Id;
///
/// let id1: Id = "req-123".into();
/// let id2: Id = 42i64.into();
///
/// assert_eq!(id1.to_string(), "\"req-123\"");
/// assert_eq!(id2.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
    /// Null identifier, also used when the request id could not be determined
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

/// Parameters of a request
///
/// The wire shape decides the binding strategy: a JSON array binds by
/// position, a JSON object binds by name, and a missing member binds as an
/// empty positional list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    /// `"params": [..]`
    Positional(Vec<Value>),
    /// `"params": {..}`
    Named(Map<String, Value>),
    /// No `params` member
    #[default]
    None,
}

impl Params {
    /// True when no `params` member was sent
    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }

    /// Number of supplied values regardless of shape
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(map) => map.len(),
            Params::None => 0,
        }
    }

    /// True when no values were supplied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Params::Positional(values),
            Value::Object(map) => Params::Named(map),
            _ => Params::None,
        }
    }
}

/// JSON-RPC 2.0 request or notification
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::{JsonRpcRequest, Id};
/// use serde_json::json;
///
/// let req = JsonRpcRequest::new("subtract", json!([42, 23]), Id::Number(1));
/// assert!(!req.is_notification());
///
/// let note = JsonRpcRequest::notification("heartbeat", json!(null));
/// assert!(note.is_notification());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version, "2.0"
    pub jsonrpc: String,
    /// Name of the remote method to invoke
    pub method: String,
    /// Positional, named or absent parameters
    #[serde(default, skip_serializing_if = "Params::is_none")]
    pub params: Params,
    /// Correlation id; `None` marks a notification
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Id>,
}

impl JsonRpcRequest {
    /// Create a request that expects a response
    pub fn new(method: impl Into<String>, params: impl Into<Params>, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: params.into(),
            id: Some(id),
        }
    }

    /// Create a notification (no `id`, never answered)
    pub fn notification(method: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: params.into(),
            id: None,
        }
    }

    /// True when the request carries no `id`
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response message
///
/// Exactly one of `result` or `error` is present. This is enforced by
/// construction through [`JsonRpcResponse::success`] and [`JsonRpcResponse::error`].
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::{JsonRpcResponse, JsonRpcErrorData, Id};
/// use serde_json::json;
///
/// let ok = JsonRpcResponse::success(json!(5), Id::Number(1));
/// assert!(ok.is_success());
///
/// let err = JsonRpcResponse::error(JsonRpcErrorData::method_not_found("x"), Id::Number(2));
/// assert!(err.is_error());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version, "2.0"
    pub jsonrpc: String,
    /// The result of the invocation; `Some(null)` for void methods
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Error information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    /// Request id, `Id::Null` when it could not be determined
    pub id: Id,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(result: Value, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(error: JsonRpcErrorData, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// True when `result` is present
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// True when `error` is present
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_null_id_is_not_a_notification() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "m", "id": null})).unwrap();
        assert_eq!(req.id, Some(Id::Null));
        assert!(!req.is_notification());

        let note: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "m"})).unwrap();
        assert!(note.is_notification());
    }

    #[test]
    fn test_params_shapes() {
        let positional: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "add", "params": [2, 3], "id": 1}),
        )
        .unwrap();
        assert_eq!(positional.params, Params::Positional(vec![json!(2), json!(3)]));

        let named: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "f", "params": {"a": 2}, "id": "x"}),
        )
        .unwrap();
        assert!(matches!(named.params, Params::Named(ref m) if m.len() == 1));
        assert_eq!(named.id, Some(Id::String("x".into())));

        let none: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "f", "id": 1})).unwrap();
        assert!(none.params.is_none());
    }

    #[test]
    fn test_request_reserializes_equivalently() {
        let original = json!({"id": 7, "params": {"b": [1, 2]}, "method": "m", "jsonrpc": "2.0"});
        let req: JsonRpcRequest = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(serde_json::to_value(&req).unwrap(), original);

        let note = json!({"jsonrpc": "2.0", "method": "ping"});
        let req: JsonRpcRequest = serde_json::from_value(note.clone()).unwrap();
        assert_eq!(serde_json::to_value(&req).unwrap(), note);
    }

    #[test]
    fn test_void_result_serializes_as_null() {
        let response = JsonRpcResponse::success(Value::Null, Id::Number(1));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "result": null, "id": 1}));

        let back: JsonRpcResponse = serde_json::from_value(value).unwrap();
        assert!(back.is_success());
    }

    #[test]
    fn test_error_response_has_no_result() {
        let response =
            JsonRpcResponse::error(JsonRpcErrorData::method_not_found("missing"), Id::Number(1));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
    }
}
