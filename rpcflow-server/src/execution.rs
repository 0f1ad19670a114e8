//! Per-call execution state machine
//!
//! One raw request element runs through these stages:
//!
//! ```text
//! Received -> Authorized -> Bound -> (activate) -> BeforeRun -> Invoked -> AfterRun -> ResponseWritten
//!                                                                     \-> Faulted (from any stage)
//! ```
//!
//! Authorization runs before binding, so callers that are not allowed to
//! reach a method never learn anything from its binding errors.
//!
//! Every stage may stop the call. Errors raised by a stage are caught here
//! and become the response message unless an earlier stage already stopped
//! the call. The [`ErrorMapper`] turns that message into a wire error
//! carrying the request id.
//!
//! The whole run races the host's [`AbortSignal`]. When it fires, the
//! in-flight stage is dropped and nothing is written.

use crate::context::{CallContext, ExecutionContext, ExecutionState, ServiceProvider};
use crate::descriptor::MethodDescriptor;
use crate::error_mapper::ErrorMapper;
use crate::filter::FilterChain;
use crate::metrics::DispatchMetrics;
use crate::registry::MethodRegistry;
use crate::transport::{AbortSignal, CallerIdentity, ResponseSink};
use rpcflow_core::{codec, Error, Id, JsonRpcResponse, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Request-scoped inputs shared by every element of a body
#[derive(Clone)]
pub(crate) struct CallEnvironment {
    pub(crate) route: String,
    pub(crate) caller: Arc<CallerIdentity>,
    pub(crate) sink: Option<Arc<dyn ResponseSink>>,
    pub(crate) abort: AbortSignal,
}

/// What one element produced
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// A response to serialize
    Respond { response: JsonRpcResponse, status: u16 },
    /// A notification; nothing to send
    Silent,
    /// Output already went through the response sink
    AlreadyWritten,
    /// The host aborted the call
    Aborted,
}

/// Shared, immutable dispatch machinery
pub(crate) struct Pipeline {
    registry: Arc<MethodRegistry>,
    mapper: ErrorMapper,
    services: Arc<ServiceProvider>,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl Pipeline {
    pub(crate) fn new(
        registry: Arc<MethodRegistry>,
        mapper: ErrorMapper,
        services: Arc<ServiceProvider>,
        metrics: Option<Arc<DispatchMetrics>>,
    ) -> Self {
        Self {
            registry,
            mapper,
            services,
            metrics,
        }
    }

    pub(crate) fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub(crate) fn metrics(&self) -> Option<&DispatchMetrics> {
        self.metrics.as_deref()
    }

    /// Error response for a failure that happened before any call existed
    pub(crate) fn reject(&self, error: &Error, id: Id) -> CallOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(error.code());
        }
        CallOutcome::Respond {
            response: self.mapper.to_response(error, id),
            status: 200,
        }
    }

    /// Runs one raw element to completion
    #[tracing::instrument(skip(self, raw, env), fields(route = %env.route))]
    pub(crate) async fn execute(&self, raw: Value, env: &CallEnvironment) -> CallOutcome {
        if env.abort.is_aborted() {
            return CallOutcome::Aborted;
        }

        let request = match codec::parse_request(raw) {
            Ok(request) => request,
            Err(malformed) => {
                tracing::debug!(error = %malformed.error, "Malformed request element");
                return self.reject(&malformed.error, malformed.id);
            }
        };
        let id = request.id.clone();

        let Some(descriptor) = self.registry.lookup(&env.route, &request.method) else {
            tracing::debug!(method = %request.method, "Method not found");
            return match id {
                None => CallOutcome::Silent,
                Some(id) => self.reject(&Error::MethodNotFound(request.method), id),
            };
        };

        let call = CallContext::new(
            id.clone(),
            &env.route,
            descriptor.method(),
            env.caller.clone(),
            self.services.clone(),
            env.sink.clone(),
        );
        let mut ctx = ExecutionContext::new(request, descriptor.clone(), call);
        let started = Instant::now();

        let completed = tokio::select! {
            biased;
            _ = env.abort.aborted() => false,
            _ = self.run_stages(&descriptor, &mut ctx) => true,
        };
        if !completed {
            tracing::debug!(method = %descriptor.method(), "Call aborted; discarding response");
            return CallOutcome::Aborted;
        }

        let message = ctx.take_response();
        self.record(&descriptor, &message, started);

        if ctx.response_started() {
            return CallOutcome::AlreadyWritten;
        }
        let Some(id) = id else {
            if let Some(Err(error)) = &message {
                tracing::debug!(method = %descriptor.method(), error = %error, "Notification failed");
            }
            return CallOutcome::Silent;
        };

        let outcome = match message {
            Some(Ok(result)) => CallOutcome::Respond {
                response: JsonRpcResponse::success(result, id),
                status: descriptor.success_status(),
            },
            Some(Err(error)) => CallOutcome::Respond {
                response: self.mapper.to_response(&error, id),
                status: 200,
            },
            None => CallOutcome::Respond {
                response: self
                    .mapper
                    .to_response(&Error::Internal("call produced no response".into()), id),
                status: 200,
            },
        };
        ctx.advance(ExecutionState::ResponseWritten);
        outcome
    }

    async fn run_stages(&self, descriptor: &Arc<MethodDescriptor>, ctx: &mut ExecutionContext) {
        if let Err(error) = self.advance(descriptor, ctx).await {
            ctx.fault(error);
        }
    }

    async fn advance(&self, descriptor: &Arc<MethodDescriptor>, ctx: &mut ExecutionContext) -> Result<()> {
        let allowed = descriptor
            .authorization_policy()
            .evaluate(descriptor.authorizations(), ctx)
            .await;
        if !allowed {
            if let Some(metrics) = &self.metrics {
                metrics.record_denied(descriptor.method());
            }
            ctx.deny(Error::Unauthorized(format!(
                "access to '{}' denied",
                descriptor.method()
            )));
            return Ok(());
        }
        ctx.advance(ExecutionState::Authorized);

        let args = descriptor.bind(&ctx.request().params)?;
        ctx.set_args(args);
        ctx.advance(ExecutionState::Bound);

        let instance = (descriptor.activator)(ctx.call())?;
        ctx.set_instance(instance.clone());

        let chain = FilterChain::instantiate(&descriptor.filters, ctx.call());
        chain.run_before(ctx).await?;
        if !ctx.continue_request() {
            return Ok(());
        }
        ctx.advance(ExecutionState::BeforeRun);

        let args = ctx.args().cloned().unwrap_or_default();
        let result = descriptor
            .invoker
            .invoke(instance, args, ctx.call().clone())
            .await?;
        ctx.set_response(Ok(result));
        ctx.advance(ExecutionState::Invoked);

        chain.run_after(ctx).await?;
        if ctx.continue_request() {
            ctx.advance(ExecutionState::AfterRun);
        }
        Ok(())
    }

    fn record(&self, descriptor: &MethodDescriptor, message: &Option<Result<Value>>, started: Instant) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = match message {
            Some(Err(error)) => {
                metrics.record_error(self.error_code(error));
                "error"
            }
            _ => "success",
        };
        metrics.record_request(descriptor.method(), outcome, started.elapsed().as_secs_f64());
    }

    fn error_code(&self, error: &Error) -> i32 {
        match error {
            Error::Unauthorized(_) => self.mapper.denial_code(),
            other => other.code(),
        }
    }
}
