//! Call filters
//!
//! Filters wrap the invocation of a method. Each descriptor holds an ordered
//! list of [`FilterFactory`]s; a fresh [`FilterChain`] is instantiated from
//! them for every call, so per-call filters can keep state in `self`.
//!
//! # Execution Order
//!
//! Both hooks run in registration order. A filter stops the call with
//! [`ExecutionContext::deny`] or [`ExecutionContext::short_circuit`]; the
//! remaining filters, the invocation and the after hooks are then skipped and
//! the message assigned at that point becomes the response.
//!
//! # Built-in Filters
//!
//! - **LoggingFilter**: logs start and end of each call
//! - **MetricsFilter**: records per-method latency
//! - **ValidationFilter**: validates bound arguments through [`Validate`]

use crate::binder::BoundArguments;
use crate::context::{CallContext, ExecutionContext};
use crate::metrics::DispatchMetrics;
use async_trait::async_trait;
use rpcflow_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Hooks around a method invocation
#[async_trait]
pub trait CallFilter: Send + Sync {
    /// Runs after authorization and binding, before the method
    async fn before_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Runs after the method produced its response message
    async fn after_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

/// Filter with synchronous hooks
pub trait SyncCallFilter: Send + Sync {
    fn before_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn after_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

struct SyncFilterAdapter<T: SyncCallFilter> {
    inner: T,
}

#[async_trait]
impl<T: SyncCallFilter + 'static> CallFilter for SyncFilterAdapter<T> {
    async fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.before_execute(ctx)
    }

    async fn after_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.after_execute(ctx)
    }
}

/// Builds the filter instance used by one call
pub type FilterFactory = Arc<dyn Fn(&CallContext) -> Arc<dyn CallFilter> + Send + Sync>;

/// Factory returning the same instance for every call
pub fn shared_filter<F: CallFilter + 'static>(filter: F) -> FilterFactory {
    let filter: Arc<dyn CallFilter> = Arc::new(filter);
    Arc::new(move |_: &CallContext| filter.clone())
}

/// Factory returning the same synchronous instance for every call
pub fn shared_sync_filter<F: SyncCallFilter + 'static>(filter: F) -> FilterFactory {
    shared_filter(SyncFilterAdapter { inner: filter })
}

/// Factory building a new instance per call
pub fn per_call_filter<F, M>(make: M) -> FilterFactory
where
    F: CallFilter + 'static,
    M: Fn(&CallContext) -> F + Send + Sync + 'static,
{
    Arc::new(move |call: &CallContext| -> Arc<dyn CallFilter> { Arc::new(make(call)) })
}

/// Filters instantiated for one call
pub(crate) struct FilterChain {
    filters: Vec<Arc<dyn CallFilter>>,
}

impl FilterChain {
    pub(crate) fn instantiate(factories: &[FilterFactory], call: &CallContext) -> Self {
        Self {
            filters: factories.iter().map(|factory| factory(call)).collect(),
        }
    }

    pub(crate) async fn run_before(&self, ctx: &mut ExecutionContext) -> Result<()> {
        for filter in &self.filters {
            if !ctx.continue_request() {
                break;
            }
            filter.before_execute(ctx).await?;
        }
        Ok(())
    }

    pub(crate) async fn run_after(&self, ctx: &mut ExecutionContext) -> Result<()> {
        for filter in &self.filters {
            if !ctx.continue_request() {
                break;
            }
            filter.after_execute(ctx).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.filters.len()
    }
}

/// Logs each call with its latency
pub struct LoggingFilter {
    started: Instant,
}

impl LoggingFilter {
    /// Per-call factory
    pub fn factory() -> FilterFactory {
        per_call_filter(|_: &CallContext| LoggingFilter {
            started: Instant::now(),
        })
    }
}

#[async_trait]
impl CallFilter for LoggingFilter {
    async fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        tracing::info!(
            route = %ctx.call().route(),
            method = %ctx.call().method(),
            id = ?ctx.call().id(),
            "Call started"
        );
        Ok(())
    }

    async fn after_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match ctx.response() {
            Some(Ok(_)) => tracing::info!(method = %ctx.call().method(), elapsed_ms, "Call completed"),
            Some(Err(e)) => {
                tracing::warn!(method = %ctx.call().method(), elapsed_ms, error = %e, "Call failed")
            }
            None => tracing::info!(method = %ctx.call().method(), elapsed_ms, "Call produced no response"),
        }
        Ok(())
    }
}

/// Records per-method latency and outcome
pub struct MetricsFilter {
    metrics: Arc<DispatchMetrics>,
    started: Instant,
}

impl MetricsFilter {
    /// Per-call factory recording into `metrics`
    pub fn factory(metrics: Arc<DispatchMetrics>) -> FilterFactory {
        per_call_filter(move |_: &CallContext| MetricsFilter {
            metrics: metrics.clone(),
            started: Instant::now(),
        })
    }
}

#[async_trait]
impl CallFilter for MetricsFilter {
    async fn after_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let outcome = match ctx.response() {
            Some(Err(_)) => "error",
            _ => "success",
        };
        self.metrics.record_request(
            ctx.call().method(),
            outcome,
            self.started.elapsed().as_secs_f64(),
        );
        Ok(())
    }
}

/// Object-level validation of a bound argument
pub trait Validate {
    /// Failure messages; empty when valid
    fn validate(&self) -> Vec<String>;
}

type ValidationRule = Arc<dyn Fn(&BoundArguments) -> Vec<String> + Send + Sync>;

/// Rejects calls whose arguments fail [`Validate`]
///
/// Messages from every validated argument are collected in declaration order
/// and the call is denied with a single invalid-request error whose message
/// joins them with `"\n"`.
#[derive(Clone, Default)]
pub struct ValidationFilter {
    rules: Vec<ValidationRule>,
}

impl ValidationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the argument at `index` as a `T`
    ///
    /// Arguments that do not convert to `T` are left to the binder's checks.
    pub fn validate_param<T>(mut self, index: usize) -> Self
    where
        T: Validate + DeserializeOwned + 'static,
    {
        self.rules.push(Arc::new(move |args: &BoundArguments| {
            args.get(index)
                .cloned()
                .and_then(|value: Value| serde_json::from_value::<T>(value).ok())
                .map(|arg| arg.validate())
                .unwrap_or_default()
        }));
        self
    }

    /// Shared factory
    pub fn into_factory(self) -> FilterFactory {
        shared_sync_filter(self)
    }
}

impl SyncCallFilter for ValidationFilter {
    fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let messages: Vec<String> = match ctx.args() {
            Some(args) => self.rules.iter().flat_map(|rule| rule(args)).collect(),
            None => return Ok(()),
        };
        if !messages.is_empty() {
            ctx.deny(Error::Validation(messages));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context_for;
    use rpcflow_core::{Id, JsonRpcRequest};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CallFilter for Recorder {
        async fn before_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            Ok(())
        }

        async fn after_execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:after", self.name));
            Ok(())
        }
    }

    struct Denier;

    impl SyncCallFilter for Denier {
        fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
            ctx.deny(Error::Unauthorized("blocked".into()));
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> FilterFactory {
        shared_filter(Recorder {
            name,
            log: log.clone(),
        })
    }

    fn request() -> JsonRpcRequest {
        JsonRpcRequest::new("noop", json!([]), Id::Number(1))
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_for(request());
        let chain = FilterChain::instantiate(
            &[recorder("first", &log), recorder("second", &log)],
            ctx.call(),
        );

        chain.run_before(&mut ctx).await.unwrap();
        chain.run_after(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:before", "second:before", "first:after", "second:after"]
        );
    }

    #[tokio::test]
    async fn test_denial_skips_remaining_filters() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_for(request());
        let chain = FilterChain::instantiate(
            &[
                recorder("first", &log),
                shared_sync_filter(Denier),
                recorder("third", &log),
            ],
            ctx.call(),
        );
        assert_eq!(chain.len(), 3);

        chain.run_before(&mut ctx).await.unwrap();
        chain.run_after(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first:before"]);
        assert!(matches!(ctx.response(), Some(Err(Error::Unauthorized(_)))));
    }

    #[tokio::test]
    async fn test_per_call_factory_builds_fresh_instances() {
        let built = Arc::new(Mutex::new(0));
        let counter = built.clone();
        let factory = per_call_filter(move |_: &CallContext| {
            *counter.lock().unwrap() += 1;
            LoggingFilter {
                started: Instant::now(),
            }
        });

        let ctx = context_for(request());
        FilterChain::instantiate(&[factory.clone()], ctx.call());
        FilterChain::instantiate(&[factory], ctx.call());
        assert_eq!(*built.lock().unwrap(), 2);
    }

    #[derive(Deserialize)]
    struct Signup {
        name: String,
        age: i64,
    }

    impl Validate for Signup {
        fn validate(&self) -> Vec<String> {
            let mut errors = Vec::new();
            if self.name.is_empty() {
                errors.push("name is required".to_string());
            }
            if self.age < 18 {
                errors.push("age must be at least 18".to_string());
            }
            errors
        }
    }

    #[tokio::test]
    async fn test_validation_joins_messages() {
        let mut ctx = context_for(request());
        ctx.set_args(BoundArguments::new(vec![json!({"name": "", "age": 3})]));
        let chain = FilterChain::instantiate(
            &[ValidationFilter::new().validate_param::<Signup>(0).into_factory()],
            ctx.call(),
        );

        chain.run_before(&mut ctx).await.unwrap();

        assert!(!ctx.continue_request());
        match ctx.response() {
            Some(Err(e @ Error::Validation(_))) => {
                assert_eq!(e.code(), -32600);
                assert_eq!(
                    e.to_string(),
                    "Validation failed: name is required\nage must be at least 18"
                );
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_passes_valid_arguments() {
        let mut ctx = context_for(request());
        ctx.set_args(BoundArguments::new(vec![json!({"name": "ann", "age": 30})]));
        let chain = FilterChain::instantiate(
            &[ValidationFilter::new().validate_param::<Signup>(0).into_factory()],
            ctx.call(),
        );

        chain.run_before(&mut ctx).await.unwrap();
        assert!(ctx.continue_request());
        assert!(ctx.response().is_none());
    }

    #[tokio::test]
    async fn test_builtin_filters_leave_call_running() {
        let metrics = Arc::new(DispatchMetrics::new("test-filters"));
        let mut ctx = context_for(request());
        let chain = FilterChain::instantiate(
            &[LoggingFilter::factory(), MetricsFilter::factory(metrics)],
            ctx.call(),
        );

        chain.run_before(&mut ctx).await.unwrap();
        ctx.set_response(Ok(json!(1)));
        chain.run_after(&mut ctx).await.unwrap();
        assert!(ctx.continue_request());
    }
}
