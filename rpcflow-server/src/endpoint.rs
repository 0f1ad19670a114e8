//! Transport-facing endpoint and its builder
//!
//! [`RpcEndpoint`] turns request bytes into response bytes. It decodes the
//! body, sends single requests through the execution state machine and
//! batches through the batch processor, then serializes whatever came back.
//!
//! # Examples
//!
//! ```rust
//! use rpcflow_server::{BatchMode, InboundRequest, RpcEndpoint};
//!
//! # async fn example() -> rpcflow_core::Result<()> {
//! let endpoint = RpcEndpoint::builder()
//!     .base_path("/rpc")
//!     .batch_mode(BatchMode::Sequential)
//!     .max_batch_size(50)
//!     .build()?;
//!
//! let response = endpoint
//!     .handle(InboundRequest::new("/rpc", r#"{"jsonrpc":"2.0","method":"nope","id":1}"#))
//!     .await;
//! assert!(response.unwrap().body_str().contains("-32601"));
//! # Ok(())
//! # }
//! ```

use crate::batch::{BatchMode, BatchOutcome, BatchProcessor};
use crate::config::ApiConfiguration;
use crate::context::ServiceProvider;
use crate::error_mapper::ErrorMapper;
use crate::execution::{CallEnvironment, CallOutcome, Pipeline};
use crate::metrics::DispatchMetrics;
use crate::registry::{normalize_route, MethodRegistry};
use crate::transport::{AbortSignal, InboundRequest, OutboundResponse, ResponseSink};
use rpcflow_core::codec::{self, Envelope};
use rpcflow_core::{Error, Id, JsonRpcResponse, ObservabilityConfig, Result};
use std::sync::Arc;

/// Environment variable holding the default maximum batch size
pub const MAX_BATCH_SIZE_ENV: &str = "RPCFLOW_MAX_BATCH_SIZE";

const CONTENT_TYPE: &str = "application/json";

const FALLBACK_BODY: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#;

/// How a call sent through [`RpcEndpoint::dispatch`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A response was written to the sink
    Written,
    /// Nothing to send: a notification or an all-notification batch
    NoContent,
    /// A handler or filter wrote to the sink itself
    AlreadyWritten,
    /// The host aborted; nothing was written
    Aborted,
}

enum Processed {
    Body(OutboundResponse),
    NoContent,
    AlreadyWritten,
    Aborted,
}

/// JSON-RPC endpoint mounted under a base path
pub struct RpcEndpoint {
    base_path: String,
    pipeline: Pipeline,
    batch: BatchProcessor,
    compress: bool,
}

impl RpcEndpoint {
    /// Starts configuring an endpoint
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Normalized base path
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Registered methods
    pub fn registry(&self) -> &MethodRegistry {
        self.pipeline.registry()
    }

    /// Processes one request and returns the bytes to send
    ///
    /// Returns `None` when there is nothing to send back.
    pub async fn handle(&self, request: InboundRequest) -> Option<OutboundResponse> {
        match self.process(request, None, AbortSignal::never()).await {
            Processed::Body(response) => Some(response),
            Processed::NoContent | Processed::AlreadyWritten | Processed::Aborted => None,
        }
    }

    /// Processes one request, writing the response to `sink`
    ///
    /// Handlers may write to the sink themselves; the endpoint then leaves it
    /// alone. When `abort` fires, in-flight calls are dropped and nothing is
    /// written.
    pub async fn dispatch(
        &self,
        request: InboundRequest,
        sink: Arc<dyn ResponseSink>,
        abort: AbortSignal,
    ) -> Result<DispatchOutcome> {
        match self.process(request, Some(sink.clone()), abort).await {
            Processed::Body(response) => {
                if sink.has_started() {
                    return Ok(DispatchOutcome::AlreadyWritten);
                }
                sink.write(response).await?;
                Ok(DispatchOutcome::Written)
            }
            Processed::NoContent => Ok(DispatchOutcome::NoContent),
            Processed::AlreadyWritten => Ok(DispatchOutcome::AlreadyWritten),
            Processed::Aborted => Ok(DispatchOutcome::Aborted),
        }
    }

    #[tracing::instrument(skip(self, request, sink, abort), fields(path = %request.path, body_len = request.body.len()))]
    async fn process(
        &self,
        request: InboundRequest,
        sink: Option<Arc<dyn ResponseSink>>,
        abort: AbortSignal,
    ) -> Processed {
        let env = CallEnvironment {
            route: normalize_route(&[request.path.as_str()]),
            caller: request.caller,
            sink,
            abort,
        };

        let envelope = match codec::decode(&request.body) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(error = %error, "Rejecting request body");
                return match self.pipeline.reject(&error, Id::Null) {
                    CallOutcome::Respond { response, status } => self.single(response, status),
                    _ => Processed::NoContent,
                };
            }
        };

        match envelope {
            Envelope::Single(raw) => match self.pipeline.execute(raw, &env).await {
                CallOutcome::Respond { response, status } => self.single(response, status),
                CallOutcome::Silent => Processed::NoContent,
                CallOutcome::AlreadyWritten => Processed::AlreadyWritten,
                CallOutcome::Aborted => Processed::Aborted,
            },
            Envelope::Batch(elements) => {
                match self.batch.process_batch(elements, &self.pipeline, &env).await {
                    BatchOutcome::Responses(responses) if responses.is_empty() => {
                        Processed::NoContent
                    }
                    BatchOutcome::Responses(responses) => {
                        self.body(codec::encode_batch_responses(&responses), 200)
                    }
                    BatchOutcome::Rejected(response) => self.single(response, 200),
                    BatchOutcome::Aborted => Processed::Aborted,
                }
            }
        }
    }

    fn single(&self, response: JsonRpcResponse, status: u16) -> Processed {
        self.body(codec::encode_response(&response), status)
    }

    fn body(&self, encoded: Result<String>, status: u16) -> Processed {
        let (body, status) = match encoded {
            Ok(body) => (body.into_bytes(), status),
            Err(error) => {
                tracing::error!(error = %error, "Failed to serialize response");
                (FALLBACK_BODY.as_bytes().to_vec(), 200)
            }
        };
        Processed::Body(OutboundResponse {
            status,
            content_type: CONTENT_TYPE,
            body,
            compress: self.compress,
        })
    }
}

/// Builder for [`RpcEndpoint`]
pub struct EndpointBuilder {
    base_path: String,
    api: ApiConfiguration,
    services: ServiceProvider,
    batch_mode: BatchMode,
    max_batch_size: Option<usize>,
    mapper: ErrorMapper,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: bool,
}

impl EndpointBuilder {
    /// Create a new endpoint builder
    ///
    /// The batch limit defaults to `RPCFLOW_MAX_BATCH_SIZE` and internal
    /// error exposure to `RPCFLOW_EXPOSE_INTERNAL_ERRORS`, when set.
    pub fn new() -> Self {
        Self {
            base_path: "/".to_string(),
            api: ApiConfiguration::new(),
            services: ServiceProvider::new(),
            batch_mode: BatchMode::default(),
            max_batch_size: std::env::var(MAX_BATCH_SIZE_ENV)
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            mapper: ErrorMapper::from_env(),
            observability_config: None,
            service_name: None,
            metrics: false,
        }
    }

    /// Path every route is mounted under
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    /// Adjusts the API configuration: exposures, authorization, filters, naming
    pub fn configure<F>(self, configure: F) -> Self
    where
        F: FnOnce(&ApiConfiguration),
    {
        configure(&self.api);
        self
    }

    /// Services available to activation and authorization
    pub fn services(mut self, services: ServiceProvider) -> Self {
        self.services = services;
        self
    }

    /// Set batch processing mode
    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    /// Set maximum batch size
    pub fn max_batch_size(mut self, max_size: usize) -> Self {
        self.max_batch_size = Some(max_size);
        self
    }

    /// Removes any batch size limit
    pub fn unlimited_batch_size(mut self) -> Self {
        self.max_batch_size = None;
        self
    }

    /// Error code for authorization denials
    pub fn denial_code(mut self, code: i32) -> Self {
        self.mapper = self.mapper.with_denial_code(code);
        self
    }

    /// Whether internal error details reach the caller
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.mapper = self.mapper.with_internal_errors_exposed(expose);
        self
    }

    /// Enable OpenTelemetry observability with a custom configuration
    ///
    /// Implies [`EndpointBuilder::with_metrics`].
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self.metrics = true;
        self
    }

    /// Set service name for observability and metrics
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Records dispatch metrics on the global meter
    pub fn with_metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    /// Build the endpoint
    ///
    /// # Errors
    ///
    /// Fails when two exposures resolve to the same route and method, or
    /// when observability cannot be initialized.
    pub fn build(self) -> Result<RpcEndpoint> {
        let base_path = normalize_route(&[self.base_path.as_str()]);
        let registry = MethodRegistry::from_configuration(&base_path, &self.api)?;

        let mut service_name = self.service_name;
        if let Some(mut config) = self.observability_config {
            if let Some(name) = &service_name {
                config.service_name = name.clone();
            }
            rpcflow_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;
            service_name = Some(config.service_name);
        }
        let metrics = self.metrics.then(|| {
            let name = service_name.unwrap_or_else(|| "rpcflow".to_string());
            Arc::new(DispatchMetrics::new(name))
        });

        let compress = self.api.current_snapshot().compression_enabled();
        tracing::info!(
            base_path = %base_path,
            methods = registry.len(),
            batch_mode = ?self.batch_mode,
            max_batch_size = ?self.max_batch_size,
            "Endpoint ready"
        );

        Ok(RpcEndpoint {
            base_path,
            pipeline: Pipeline::new(
                Arc::new(registry),
                self.mapper,
                Arc::new(self.services),
                metrics,
            ),
            batch: BatchProcessor::with_limit(self.batch_mode, self.max_batch_size),
            compress,
        })
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::descriptor::{ExposedService, MethodMetadata, ParameterInfo, ReturnShape};
    use crate::invoker::{Activation, MethodInvoker};
    use crate::transport::BufferedSink;
    use serde_json::{json, Value};

    struct Echo;

    impl ExposedService for Echo {
        fn service_name() -> &'static str {
            "Echo"
        }

        fn methods() -> Vec<MethodMetadata> {
            vec![
                MethodMetadata::new(
                    "echo",
                    ReturnShape::SyncValue,
                    MethodInvoker::sync_value(|_: &Echo, mut args, _| args.take::<Value>(0)),
                )
                .param(ParameterInfo::wire::<Value>(0, "value")),
                MethodMetadata::new(
                    "stream",
                    ReturnShape::AsyncValue,
                    MethodInvoker::async_value(|_: Arc<Echo>, _, call: CallContext| async move {
                        if let Some(sink) = call.sink() {
                            sink.write(OutboundResponse {
                                status: 200,
                                content_type: "text/plain",
                                body: b"raw".to_vec(),
                                compress: false,
                            })
                            .await?;
                        }
                        Ok::<_, Error>("ignored")
                    }),
                ),
            ]
        }
    }

    fn endpoint() -> RpcEndpoint {
        RpcEndpoint::builder()
            .base_path("rpc/")
            .unlimited_batch_size()
            .configure(|api| {
                api.expose_as("", Activation::shared(Echo));
            })
            .build()
            .unwrap()
    }

    fn body_json(response: &OutboundResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_single_request() {
        let response = endpoint()
            .handle(InboundRequest::new(
                "/rpc",
                r#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json");
        assert_eq!(body_json(&response), json!({"jsonrpc": "2.0", "result": "hi", "id": 1}));
    }

    #[tokio::test]
    async fn test_parse_error_and_empty_batch() {
        let endpoint = endpoint();

        let response = endpoint.handle(InboundRequest::new("/rpc", "{not json")).await.unwrap();
        let body = body_json(&response);
        assert_eq!(body["error"]["code"], json!(-32700));
        assert_eq!(body["id"], Value::Null);

        let response = endpoint.handle(InboundRequest::new("/rpc", "[]")).await.unwrap();
        let body = body_json(&response);
        assert!(body.is_object());
        assert_eq!(body["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn test_notification_has_no_body() {
        let endpoint = endpoint();
        let single = endpoint
            .handle(InboundRequest::new("/rpc", r#"{"jsonrpc":"2.0","method":"echo","params":[1]}"#))
            .await;
        assert!(single.is_none());

        let batch = endpoint
            .handle(InboundRequest::new(
                "/rpc",
                r#"[{"jsonrpc":"2.0","method":"echo","params":[1]},{"jsonrpc":"2.0","method":"nope"}]"#,
            ))
            .await;
        assert!(batch.is_none());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = endpoint()
            .handle(InboundRequest::new(
                "/elsewhere",
                r#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(body_json(&response)["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn test_dispatch_writes_to_sink() {
        let sink = Arc::new(BufferedSink::new());
        let outcome = endpoint()
            .dispatch(
                InboundRequest::new("/rpc/", r#"{"jsonrpc":"2.0","method":"echo","params":[5],"id":2}"#),
                sink.clone(),
                AbortSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Written);
        assert_eq!(body_json(&sink.take().unwrap())["result"], json!(5));
    }

    #[tokio::test]
    async fn test_handler_writing_to_sink_suppresses_response() {
        let sink = Arc::new(BufferedSink::new());
        let outcome = endpoint()
            .dispatch(
                InboundRequest::new("/rpc", r#"{"jsonrpc":"2.0","method":"stream","id":3}"#),
                sink.clone(),
                AbortSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::AlreadyWritten);
        assert_eq!(sink.take().unwrap().body_str(), "raw");
    }

    #[tokio::test]
    async fn test_compression_hint_follows_configuration() {
        let endpoint = RpcEndpoint::builder()
            .configure(|api| {
                api.enable_compression().expose_instance(Echo);
            })
            .build()
            .unwrap();

        let response = endpoint
            .handle(InboundRequest::new(
                "/Echo",
                r#"{"jsonrpc":"2.0","method":"echo","params":[1],"id":1}"#,
            ))
            .await
            .unwrap();
        assert!(response.compress);
    }

    #[test]
    fn test_duplicate_exposure_fails_build() {
        let result = RpcEndpoint::builder()
            .configure(|api| {
                api.expose_instance(Echo).expose_instance(Echo);
            })
            .build();
        assert!(matches!(result, Err(Error::DuplicateMethod { .. })));
    }
}
