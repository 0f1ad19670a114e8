//! Error types for rpcflow
//!
//! This module defines the failure taxonomy of the dispatch pipeline and the
//! wire representation those failures are normalized into:
//!
//! - **Error**: Application-level errors raised by binding, authorization,
//!   invocation, filters and configuration (uses thiserror)
//! - **JsonRpcErrorData**: Wire-format errors as defined by JSON-RPC 2.0
//!
//! # Error Codes
//!
//! JSON-RPC 2.0 reserves these codes:
//! - `-32700`: Parse error (invalid JSON)
//! - `-32600`: Invalid request (malformed envelope, validation failures)
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//!
//! Authorization denials default to the application code `-32001`, which the
//! server's error mapper allows to be overridden.
//!
//! # Examples
//!
//! ```rust
//! use rpcflow_core::{Error, JsonRpcErrorData};
//!
//! let error = Error::MethodNotFound("unknownMethod".into());
//! assert_eq!(error.code(), -32601);
//!
//! let json_error = JsonRpcErrorData::method_not_found("unknownMethod");
//! assert_eq!(json_error.code, -32601);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for rpcflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes used on the wire
pub mod codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not exposed
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Default code for a denied authorization check
    pub const UNAUTHORIZED: i32 = -32001;
}

/// Application-level error type for rpcflow operations
///
/// Every stage of a call reports failures through this enum. The execution
/// state machine catches them at its outermost boundary and hands them to the
/// server's error mapper, so nothing here ever reaches a transport raw.
///
/// # Error Categories
///
/// - **Protocol errors**: Parse, InvalidRequest, BatchSizeExceeded
/// - **Routing errors**: MethodNotFound
/// - **Binding errors**: InvalidParams, ParameterBinding
/// - **Policy errors**: Unauthorized, Validation
/// - **Processing errors**: Serialization, Internal, Aborted
/// - **Configuration errors**: Configuration, DuplicateMethod
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// JSON-RPC protocol error (already in wire format)
    ///
    /// Service methods may return this to choose their own code and data.
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// The request body is not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid JSON-RPC request envelope
    ///
    /// The JSON is valid, but it is not a well-formed request object
    /// (wrong version, missing method, non-object batch element).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No method is registered under the requested route and name
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters are structurally wrong for the method
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A single parameter could not be bound to its declared type
    ///
    /// Carries enough context for the caller to fix the request: the
    /// parameter's name and the type it was declared with.
    #[error("Invalid params: parameter '{parameter}' expected {expected}: {reason}")]
    ParameterBinding {
        /// Declared parameter name
        parameter: String,
        /// Declared parameter type
        expected: String,
        /// Why conversion failed
        reason: String,
    },

    /// An authorization check denied the call
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Object validation failed
    ///
    /// Holds every message produced, in declaration order.
    #[error("Validation failed: {}", .0.join("\n"))]
    Validation(Vec<String>),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unhandled failure inside a service method or filter
    ///
    /// The detail is for local diagnostics; the error mapper withholds it
    /// from the wire unless configured otherwise.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The host transport aborted the call
    #[error("Call aborted")]
    Aborted,

    /// Batch request size exceeded limit
    #[error("Batch size limit exceeded: limit={limit}, actual={actual}")]
    BatchSizeExceeded {
        /// The maximum allowed batch size
        limit: usize,
        /// The actual batch size that was rejected
        actual: usize,
    },

    /// Two exposures resolved to the same route and method name
    #[error("Duplicate method '{method}' on route '{route}'")]
    DuplicateMethod {
        /// Normalized route
        route: String,
        /// Method name after naming conventions
        method: String,
    },

    /// Invalid configuration detected while building the registry
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Wire code this error maps to with default settings
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc(data) => data.code,
            Error::Parse(_) => codes::PARSE_ERROR,
            Error::InvalidRequest(_) | Error::Validation(_) | Error::BatchSizeExceeded { .. } => {
                codes::INVALID_REQUEST
            }
            Error::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) | Error::ParameterBinding { .. } => codes::INVALID_PARAMS,
            Error::Unauthorized(_) => codes::UNAUTHORIZED,
            Error::Serialization(_)
            | Error::Internal(_)
            | Error::Aborted
            | Error::DuplicateMethod { .. }
            | Error::Configuration(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Shorthand for a binding failure
    pub fn binding(
        parameter: impl Into<String>,
        expected: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::ParameterBinding {
            parameter: parameter.into(),
            expected: expected.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// JSON-RPC 2.0 error data as it appears on the wire
///
/// Error objects MUST contain a numeric `code` and a short `message`, and
/// MAY contain structured `data`.
///
/// # Examples
///
/// ```rust
/// use rpcflow_core::JsonRpcErrorData;
/// use serde_json::json;
///
/// let error = JsonRpcErrorData::method_not_found("calculate");
/// assert_eq!(error.code, -32601);
///
/// let custom = JsonRpcErrorData::with_data(
///     1001,
///     "Insufficient funds",
///     json!({"balance": 50, "required": 100})
/// );
/// assert!(custom.data.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code indicating the error type
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Optional additional error information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    /// Create a new JSON-RPC error with code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new JSON-RPC error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a parse error (-32700)
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg)
    }

    /// Create a method not found error (-32601)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rpcflow_core::JsonRpcErrorData;
    ///
    /// let error = JsonRpcErrorData::method_not_found("calculateFoo");
    /// assert_eq!(error.message, "Method not found: calculateFoo");
    /// ```
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Create an invalid params error (-32602)
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, msg)
    }

    /// Create an internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, msg)
    }

    /// Create a batch size exceeded error (-32600)
    pub fn batch_size_exceeded(limit: usize, actual: usize) -> Self {
        Self::new(
            codes::INVALID_REQUEST,
            format!("Batch size limit exceeded: limit={}, actual={}", limit, actual),
        )
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    /// Formats as "[code] message", e.g. "[-32601] Method not found: unknownMethod"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_from_serde() {
        let serde_error = serde_json::from_str::<serde_json::Value>(r#"{"invalid": json"#)
            .unwrap_err();
        let error: Error = serde_error.into();

        match error {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_jsonrpc_error_with_data() {
        let error = JsonRpcErrorData::with_data(
            -32602,
            "Invalid params",
            json!({"missing": ["username", "password"]}),
        );

        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "Invalid params");
        let data = error.data.unwrap();
        assert_eq!(data["missing"][0], "username");
        assert_eq!(data["missing"][1], "password");
    }

    #[test]
    fn test_jsonrpc_error_display() {
        let error = JsonRpcErrorData::method_not_found("unknownMethod");
        let display = format!("{}", error);

        assert!(display.contains("-32601"));
        assert!(display.contains("Method not found"));
    }

    #[test]
    fn test_all_jsonrpc_error_codes() {
        let errors = vec![
            (JsonRpcErrorData::parse_error(), -32700),
            (JsonRpcErrorData::invalid_request("test"), -32600),
            (JsonRpcErrorData::method_not_found("test"), -32601),
            (JsonRpcErrorData::invalid_params("test"), -32602),
            (JsonRpcErrorData::internal_error("test"), -32603),
            (JsonRpcErrorData::batch_size_exceeded(1, 2), -32600),
        ];

        for (error, expected_code) in errors {
            assert_eq!(error.code, expected_code);
            assert!(!error.message.is_empty());
        }
    }

    #[test]
    fn test_error_variant_codes() {
        assert_eq!(Error::Parse("x".into()).code(), -32700);
        assert_eq!(Error::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(Error::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(Error::binding("a", "i64", "not a number").code(), -32602);
        assert_eq!(Error::Unauthorized("x".into()).code(), codes::UNAUTHORIZED);
        assert_eq!(Error::Validation(vec!["a".into()]).code(), -32600);
        assert_eq!(Error::Internal("boom".into()).code(), -32603);
        assert_eq!(
            Error::JsonRpc(JsonRpcErrorData::new(42, "custom")).code(),
            42
        );
    }

    #[test]
    fn test_binding_error_display_names_parameter_and_type() {
        let error = Error::binding("amount", "u64", "invalid type: string");
        let display = error.to_string();

        assert!(display.contains("amount"));
        assert!(display.contains("u64"));
    }

    #[test]
    fn test_validation_display_joins_messages() {
        let error = Error::Validation(vec!["name is required".into(), "age too low".into()]);
        assert_eq!(
            error.to_string(),
            "Validation failed: name is required\nage too low"
        );
    }

    #[test]
    fn test_error_deserialization_without_data() {
        let json = r#"{"code":-32601,"message":"Method not found"}"#;
        let error: JsonRpcErrorData = serde_json::from_str(json).unwrap();

        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
        assert!(error.data.is_none());
        assert!(!serde_json::to_string(&error).unwrap().contains("data"));
    }
}
