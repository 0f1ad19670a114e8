//! Core JSON-RPC 2.0 types, codec and building blocks for rpcflow
//!
//! This crate holds everything the dispatch pipeline in `rpcflow-server`
//! builds on but that knows nothing about methods or services:
//!
//! - **Types**: request, response and error envelopes
//! - **Codec**: body decoding into single or batch envelopes and per-element validation
//! - **Error handling**: the failure taxonomy and its wire codes
//! - **Persistent lists**: immutable append lists behind a CAS-updated slot
//! - **Observability**: OpenTelemetry and `tracing` bootstrap
//!
//! # Example
//!
//! ```rust
//! use rpcflow_core::{codec, Id, JsonRpcRequest};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new("add", json!([2, 3]), Id::Number(1));
//! let text = codec::encode(&request).unwrap();
//!
//! let parsed = codec::parse_request(serde_json::from_str(&text).unwrap()).unwrap();
//! assert_eq!(parsed, request);
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod persistent;
pub mod types;

pub use error::{codes, Error, JsonRpcErrorData, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use persistent::{AtomicList, PersistentList};
pub use types::{Id, JsonRpcRequest, JsonRpcResponse, Params, JSONRPC_VERSION};
