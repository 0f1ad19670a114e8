//! Failure to wire-error mapping
//!
//! Every failure a call produces ends up here before it is serialized. The
//! mapper picks the JSON-RPC code and decides how much detail the caller
//! sees: internal failures are logged in full and reported as a bare
//! "Internal error" unless exposure is switched on.
//!
//! | Failure | Code |
//! |---|---|
//! | malformed JSON | -32700 |
//! | malformed envelope, validation, oversized batch | -32600 |
//! | unknown route or method | -32601 |
//! | binding failure | -32602 |
//! | authorization denial | configurable, -32001 by default |
//! | anything else | -32603 |

use rpcflow_core::{codes, Error, Id, JsonRpcErrorData, JsonRpcResponse};
use serde_json::json;

/// Environment variable that exposes internal error details on the wire
pub const EXPOSE_INTERNAL_ERRORS_ENV: &str = "RPCFLOW_EXPOSE_INTERNAL_ERRORS";

/// Maps pipeline errors to JSON-RPC error objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMapper {
    denial_code: i32,
    expose_internal_errors: bool,
}

impl ErrorMapper {
    /// Default codes, internal details withheld
    pub fn new() -> Self {
        Self {
            denial_code: codes::UNAUTHORIZED,
            expose_internal_errors: false,
        }
    }

    /// Default codes, exposure taken from `RPCFLOW_EXPOSE_INTERNAL_ERRORS`
    pub fn from_env() -> Self {
        let expose = std::env::var(EXPOSE_INTERNAL_ERRORS_ENV)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self::new().with_internal_errors_exposed(expose)
    }

    /// Code used for authorization denials
    pub fn with_denial_code(mut self, code: i32) -> Self {
        self.denial_code = code;
        self
    }

    /// Whether internal error details reach the caller
    pub fn with_internal_errors_exposed(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Code used for authorization denials
    pub fn denial_code(&self) -> i32 {
        self.denial_code
    }

    /// Wire error for `error`
    pub fn to_error_data(&self, error: &Error) -> JsonRpcErrorData {
        match error {
            Error::JsonRpc(data) => data.clone(),
            Error::Parse(_) => JsonRpcErrorData::parse_error(),
            Error::InvalidRequest(msg) => JsonRpcErrorData::invalid_request(msg.clone()),
            Error::MethodNotFound(method) => JsonRpcErrorData::method_not_found(method.clone()),
            Error::InvalidParams(msg) => JsonRpcErrorData::invalid_params(msg.clone()),
            Error::ParameterBinding {
                parameter,
                expected,
                reason,
            } => JsonRpcErrorData::with_data(
                codes::INVALID_PARAMS,
                error.to_string(),
                json!({
                    "parameter": parameter,
                    "expected": expected,
                    "reason": reason,
                }),
            ),
            Error::Unauthorized(_) => JsonRpcErrorData::new(self.denial_code, error.to_string()),
            Error::Validation(messages) => JsonRpcErrorData::invalid_request(messages.join("\n")),
            Error::BatchSizeExceeded { limit, actual } => {
                JsonRpcErrorData::batch_size_exceeded(*limit, *actual)
            }
            Error::Aborted => JsonRpcErrorData::internal_error(error.to_string()),
            Error::Serialization(_)
            | Error::Internal(_)
            | Error::DuplicateMethod { .. }
            | Error::Configuration(_) => {
                tracing::error!(error = %error, "Internal failure while processing call");
                if self.expose_internal_errors {
                    JsonRpcErrorData::internal_error(error.to_string())
                } else {
                    JsonRpcErrorData::internal_error("Internal error")
                }
            }
        }
    }

    /// Error response for `error` carrying `id`
    pub fn to_response(&self, error: &Error, id: Id) -> JsonRpcResponse {
        JsonRpcResponse::error(self.to_error_data(error), id)
    }
}

impl Default for ErrorMapper {
    fn default() -> Self {
        Self::from_env()
    }
}
