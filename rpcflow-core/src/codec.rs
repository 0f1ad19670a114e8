//! Codec for JSON-RPC envelopes
//!
//! Decoding happens in two steps so that a malformed element never poisons
//! its neighbours:
//!
//! 1. [`decode`] parses the body into an [`Envelope`]: a single value or a
//!    non-empty batch of raw values. Invalid JSON is a parse error (-32700),
//!    an empty array is an invalid request (-32600).
//! 2. [`parse_request`] validates one raw value as a request. On failure it
//!    returns a [`MalformedRequest`] that still carries whatever id could be
//!    recovered, so the error response can echo it.
//!
//! # Examples
//!
//! ```rust
//! use rpcflow_core::codec::{self, Envelope};
//!
//! let envelope = codec::decode(br#"[{"jsonrpc":"2.0","method":"a","id":1}]"#).unwrap();
//! assert!(matches!(envelope, Envelope::Batch(ref items) if items.len() == 1));
//! ```

use crate::error::{Error, Result};
use crate::types::{Id, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use serde::Serialize;
use serde_json::Value;

/// A decoded request body
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A single top-level value (normally an object)
    Single(Value),
    /// A non-empty array of raw elements
    Batch(Vec<Value>),
}

/// A request element that failed validation
#[derive(Debug, Clone)]
pub struct MalformedRequest {
    /// The id recovered from the element, or `Id::Null`
    pub id: Id,
    /// Why the element was rejected
    pub error: Error,
}

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a single response
pub fn encode_response(resp: &JsonRpcResponse) -> Result<String> {
    encode(resp)
}

/// Encode the responses of a batch as a JSON array
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::{codec, JsonRpcResponse, Id};
/// use serde_json::json;
///
/// let responses = vec![
///     JsonRpcResponse::success(json!(42), Id::Number(1)),
///     JsonRpcResponse::success(json!(99), Id::Number(2)),
/// ];
///
/// let json = codec::encode_batch_responses(&responses).unwrap();
/// assert!(json.starts_with('['));
/// ```
pub fn encode_batch_responses(responses: &[JsonRpcResponse]) -> Result<String> {
    encode(&responses)
}

/// Decode a request body into a single value or a batch
///
/// # Errors
///
/// - `Error::Parse` if the body is not valid JSON
/// - `Error::InvalidRequest` if the body is an empty array
pub fn decode(data: &[u8]) -> Result<Envelope> {
    let value: Value = serde_json::from_slice(data).map_err(|e| Error::Parse(e.to_string()))?;

    match value {
        Value::Array(items) if items.is_empty() => {
            Err(Error::InvalidRequest("Batch cannot be empty".into()))
        }
        Value::Array(items) => Ok(Envelope::Batch(items)),
        other => Ok(Envelope::Single(other)),
    }
}

/// Best-effort id extraction used to address error responses
///
/// Returns `None` when the member is absent (a notification) and
/// `Some(Id::Null)` when it is present but unusable.
pub fn extract_id(value: &Value) -> Option<Id> {
    let raw = value.as_object()?.get("id")?;
    Some(serde_json::from_value(raw.clone()).unwrap_or(Id::Null))
}

/// Validate one raw element as a JSON-RPC 2.0 request
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::{codec, Id};
/// use serde_json::json;
///
/// let bad = codec::parse_request(json!({"jsonrpc": "1.0", "method": "m", "id": 4}));
/// let err = bad.unwrap_err();
/// assert_eq!(err.id, Id::Number(4));
/// assert_eq!(err.error.code(), -32600);
/// ```
pub fn parse_request(value: Value) -> std::result::Result<JsonRpcRequest, MalformedRequest> {
    let malformed = |id: Id, reason: &str| MalformedRequest {
        id,
        error: Error::InvalidRequest(reason.to_string()),
    };

    let Some(object) = value.as_object() else {
        return Err(malformed(Id::Null, "Request must be an object"));
    };
    let id = extract_id(&value).unwrap_or(Id::Null);

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(malformed(id, "Invalid or missing jsonrpc version"));
    }
    if !matches!(object.get("method"), Some(Value::String(_))) {
        return Err(malformed(id, "Method must be a string"));
    }
    if let Some(params) = object.get("params") {
        if !(params.is_array() || params.is_object() || params.is_null()) {
            return Err(malformed(id, "Params must be an array or an object"));
        }
    }
    if let Some(raw_id) = object.get("id") {
        if !(raw_id.is_string() || raw_id.is_i64() || raw_id.is_u64() || raw_id.is_null()) {
            return Err(malformed(Id::Null, "Id must be a string, an integer or null"));
        }
    }

    serde_json::from_value(value).map_err(|e| MalformedRequest {
        id,
        error: Error::InvalidRequest(e.to_string()),
    })
}
