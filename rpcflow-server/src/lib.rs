//! JSON-RPC 2.0 request-processing engine
//!
//! This crate turns exposed Rust service types into JSON-RPC methods and runs
//! each incoming call through a fixed pipeline. It owns no socket: a host
//! transport hands it request bytes and sends back whatever it returns.
//!
//! # Core Features
//!
//! - **Method Registry**: `(route, method)` lookup built once from an [`ApiConfiguration`]
//! - **Parameter Binding**: positional and named params with defaults and type checks
//! - **Authorization**: per-service checks combined with [`AuthorizationPolicy`]
//! - **Filters**: before/after hooks around every invocation
//! - **Batch Processing**: parallel or sequential, order-preserving, size-limited
//! - **Cancellation**: an [`AbortSignal`] drops in-flight calls without writing
//! - **Observability**: tracing spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rpcflow::{rpc_service, Activation, InboundRequest, RpcEndpoint};
//!
//! struct Calculator;
//!
//! #[rpc_service]
//! impl Calculator {
//!     pub fn add(&self, a: i64, b: i64) -> i64 {
//!         a + b
//!     }
//! }
//!
//! # async fn example() -> rpcflow_core::Result<()> {
//! let endpoint = RpcEndpoint::builder()
//!     .base_path("/rpc")
//!     .configure(|api| {
//!         api.expose_as("", Activation::shared(Calculator));
//!     })
//!     .build()?;
//!
//! let response = endpoint
//!     .handle(InboundRequest::new("/rpc", r#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":1}"#))
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! Configuration happens once, dispatch happens many times:
//!
//! - **Configuration**: an [`ApiConfiguration`] collects exposures under
//!   immutable snapshots; [`MethodRegistry`] turns them into descriptors
//! - **Dispatch**: every request element gets its own execution context and
//!   runs authorize, bind, activate, before-filters, invoke, after-filters
//! - **Mapping**: every failure becomes a JSON-RPC error through [`ErrorMapper`]
//!
//! Shared state is immutable or swapped atomically, so dispatch takes no
//! locks.

mod authorization;
mod batch;
mod binder;
mod config;
mod context;
mod descriptor;
mod endpoint;
mod error_mapper;
mod execution;
mod filter;
mod invoker;
mod metrics;
mod registry;
mod transport;

pub use authorization::{
    AllowAll, AuthorizationPolicy, MethodAuthorization, PolicyEvaluator, Predicate,
    UserAuthenticated, UserHasPolicy, UserHasRole,
};
pub use batch::BatchMode;
pub use binder::{BindingStrategy, BoundArguments};
pub use config::{
    ApiConfiguration, AuthorizationProvider, ConfigurationSnapshot, ExposedMethod,
    ExposureProvider, FilterProvider, MethodPredicate, NamingConventions, PrefixProvider,
    Requirement,
};
pub use context::{CallContext, CallResult, ExecutionContext, ExecutionState, ServiceProvider};
pub use descriptor::{
    type_check, ExposedService, MethodCandidate, MethodDescriptor, MethodMetadata, ParameterInfo,
    ParameterSource, ReturnShape, TypeCheck,
};
pub use endpoint::{DispatchOutcome, EndpointBuilder, RpcEndpoint, MAX_BATCH_SIZE_ENV};
pub use error_mapper::{ErrorMapper, EXPOSE_INTERNAL_ERRORS_ENV};
pub use filter::{
    per_call_filter, shared_filter, shared_sync_filter, CallFilter, FilterFactory, LoggingFilter,
    MetricsFilter, SyncCallFilter, Validate, ValidationFilter,
};
pub use invoker::{Activation, Instance, InvokeFuture, MethodInvoker};
pub use metrics::DispatchMetrics;
pub use registry::{normalize_route, MethodRegistry};
pub use transport::{
    AbortHandle, AbortSignal, BufferedSink, CallerIdentity, InboundRequest, OutboundResponse,
    ResponseSink,
};

pub use rpcflow_core::{Error, Id, JsonRpcErrorData, Result};

/// Re-exports used by code generated with `#[rpc_service]`
#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
