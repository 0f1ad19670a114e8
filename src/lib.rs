//! rpcflow - JSON-RPC 2.0 request processing
//!
//! This is the convenience crate that re-exports the rpcflow sub-crates.
//! Depend on it when you want one dependency for exposing services, and
//! enable the `http` feature for a ready-made warp adapter.
//!
//! # Architecture
//!
//! rpcflow is organized into modular crates:
//!
//! - **rpcflow-core**: wire types, codec, error taxonomy, persistent lists, observability
//! - **rpcflow-server**: registry, binding, authorization, filters, execution and batching
//! - **rpcflow-macros**: `#[rpc_service]`, which describes an impl block's methods
//!
//! # Quick Start
//!
//! ```rust
//! use rpcflow::{rpc_service, Activation, InboundRequest, RpcEndpoint};
//!
//! struct Calculator;
//!
//! #[rpc_service(crate = rpcflow::server)]
//! impl Calculator {
//!     pub fn add(&self, a: i64, b: i64) -> i64 {
//!         a + b
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rpcflow::Result<()> {
//! let endpoint = RpcEndpoint::builder()
//!     .base_path("/rpc")
//!     .configure(|api| {
//!         api.expose_as("", Activation::shared(Calculator));
//!     })
//!     .build()?;
//!
//! let response = endpoint
//!     .handle(InboundRequest::new(
//!         "/rpc",
//!         r#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":1}"#,
//!     ))
//!     .await
//!     .unwrap();
//! assert_eq!(response.body_str(), r#"{"jsonrpc":"2.0","result":5,"id":1}"#);
//! # Ok(())
//! # }
//! ```

pub use rpcflow_core as core;
pub use rpcflow_macros as macros;
pub use rpcflow_server as server;

// Convenience re-exports of the most commonly used types
pub use rpcflow_core::{Error, Id, JsonRpcErrorData, Result};
pub use rpcflow_macros::rpc_service;
pub use rpcflow_server::{
    Activation, ApiConfiguration, AuthorizationPolicy, BatchMode, CallContext, CallerIdentity,
    ExposedService, InboundRequest, OutboundResponse, Requirement, RpcEndpoint, ServiceProvider,
};

#[cfg(feature = "http")]
pub mod http;
