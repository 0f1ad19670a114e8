//! Per-call state
//!
//! [`ExecutionContext`] is created when a call starts, exclusively owned by
//! that call and dropped when it ends. It carries the parsed request, the
//! bound arguments, the activated instance and the response message.
//!
//! The response message follows a single-assignment rule: once any stage
//! stops the call (`continue_request` turns false), the message assigned at
//! that point is final and later stages cannot overwrite it.
//!
//! [`CallContext`] is the cheap, clonable view handed to service methods,
//! activation factories and authorization predicates.

use crate::descriptor::MethodDescriptor;
use crate::binder::BoundArguments;
use crate::transport::{CallerIdentity, ResponseSink};
use rpcflow_core::{Error, Id, JsonRpcRequest, Result};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed registry of shared services
///
/// Used by [`crate::invoker::Activation::Resolve`] and by authorization
/// checks that need collaborators, such as a policy evaluator.
#[derive(Default, Clone)]
pub struct ServiceProvider {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceProvider {
    /// An empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance under its concrete type
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    /// Builder-style [`ServiceProvider::insert`]
    pub fn with<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    /// Looks up a service by type
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.services.len())
            .finish()
    }
}

/// What a service method can see about the call it serves
#[derive(Clone)]
pub struct CallContext {
    id: Option<Id>,
    route: Arc<str>,
    method: Arc<str>,
    caller: Arc<CallerIdentity>,
    services: Arc<ServiceProvider>,
    sink: Option<Arc<dyn ResponseSink>>,
}

impl CallContext {
    pub(crate) fn new(
        id: Option<Id>,
        route: &str,
        method: &str,
        caller: Arc<CallerIdentity>,
        services: Arc<ServiceProvider>,
        sink: Option<Arc<dyn ResponseSink>>,
    ) -> Self {
        Self {
            id,
            route: route.into(),
            method: method.into(),
            caller,
            services,
            sink,
        }
    }

    /// Request id, `None` for notifications
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Normalized route the call arrived on
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Method name as registered
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Ambient caller identity
    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    /// Shared services
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    /// Host response sink, when the call may stream output directly
    pub fn sink(&self) -> Option<&Arc<dyn ResponseSink>> {
        self.sink.as_ref()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("method", &self.method)
            .field("caller", &self.caller)
            .finish()
    }
}

/// Result assigned as a call's response message
pub type CallResult = Result<Value>;

/// Stage reached by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Request parsed and method resolved
    Received,
    /// Parameters bound to the signature
    Bound,
    /// Authorization checks passed
    Authorized,
    /// Before-filters ran
    BeforeRun,
    /// Target method completed
    Invoked,
    /// After-filters ran
    AfterRun,
    /// Response message serialized
    ResponseWritten,
    /// A stage failed; the failure is the response message
    Faulted,
}

/// Exclusive per-call state threaded through every stage
pub struct ExecutionContext {
    request: JsonRpcRequest,
    descriptor: Arc<MethodDescriptor>,
    call: CallContext,
    args: Option<BoundArguments>,
    instance: Option<Arc<dyn Any + Send + Sync>>,
    continue_request: bool,
    response: Option<CallResult>,
    response_started: bool,
    state: ExecutionState,
    metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub(crate) fn new(
        request: JsonRpcRequest,
        descriptor: Arc<MethodDescriptor>,
        call: CallContext,
    ) -> Self {
        Self {
            request,
            descriptor,
            call,
            args: None,
            instance: None,
            continue_request: true,
            response: None,
            response_started: false,
            state: ExecutionState::Received,
            metadata: HashMap::new(),
        }
    }

    /// The parsed request
    pub fn request(&self) -> &JsonRpcRequest {
        &self.request
    }

    /// Descriptor of the target method
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Call view shared with the target method
    pub fn call(&self) -> &CallContext {
        &self.call
    }

    /// Ambient caller identity
    pub fn caller(&self) -> &CallerIdentity {
        self.call.caller()
    }

    /// Bound arguments, once binding ran
    pub fn args(&self) -> Option<&BoundArguments> {
        self.args.as_ref()
    }

    pub(crate) fn set_args(&mut self, args: BoundArguments) {
        self.args = Some(args);
    }

    /// Activated service instance, once activation ran
    pub fn instance(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.instance.as_ref()
    }

    pub(crate) fn set_instance(&mut self, instance: Arc<dyn Any + Send + Sync>) {
        self.instance = Some(instance);
    }

    /// False once any stage stopped the call
    pub fn continue_request(&self) -> bool {
        self.continue_request
    }

    /// Current stage
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub(crate) fn advance(&mut self, state: ExecutionState) {
        tracing::trace!(method = %self.call.method(), from = ?self.state, to = ?state, "Call advanced");
        self.state = state;
    }

    /// Response message assigned so far
    pub fn response(&self) -> Option<&CallResult> {
        self.response.as_ref()
    }

    /// Assigns the response message while the call is still running
    ///
    /// Returns false, leaving the message untouched, if the call was stopped.
    pub fn set_response(&mut self, response: CallResult) -> bool {
        if !self.continue_request {
            return false;
        }
        self.response = Some(response);
        true
    }

    /// Stops the call with `response` as its final message
    ///
    /// Only the first stop wins; returns false if the call was already stopped.
    pub fn short_circuit(&mut self, response: CallResult) -> bool {
        if !self.continue_request {
            return false;
        }
        self.continue_request = false;
        self.response = Some(response);
        true
    }

    /// Stops the call with an error response
    pub fn deny(&mut self, error: Error) -> bool {
        self.short_circuit(Err(error))
    }

    pub(crate) fn fault(&mut self, error: Error) {
        self.state = ExecutionState::Faulted;
        if self.continue_request {
            self.continue_request = false;
            self.response = Some(Err(error));
        } else {
            tracing::debug!(error = %error, "Failure after the call was stopped; keeping first response");
        }
    }

    pub(crate) fn take_response(&mut self) -> Option<CallResult> {
        self.response.take()
    }

    /// Records that output was streamed directly to the host sink
    pub fn mark_response_started(&mut self) {
        self.response_started = true;
    }

    /// True when output already went to the host sink
    pub fn response_started(&self) -> bool {
        self.response_started || self.call.sink().is_some_and(|sink| sink.has_started())
    }

    /// Per-call scratch values shared between filters
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Stores a per-call scratch value
    pub fn insert_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("method", &self.request.method)
            .field("id", &self.request.id)
            .field("state", &self.state)
            .field("continue_request", &self.continue_request)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::descriptor::{MethodDescriptor, MethodMetadata, ReturnShape};
    use crate::invoker::MethodInvoker;
    use serde_json::json;

    pub(crate) fn context_for(request: JsonRpcRequest) -> ExecutionContext {
        context_with(request, CallerIdentity::anonymous(), ServiceProvider::new())
    }

    pub(crate) fn context_with(
        request: JsonRpcRequest,
        caller: CallerIdentity,
        services: ServiceProvider,
    ) -> ExecutionContext {
        let metadata = MethodMetadata::new(
            "noop",
            ReturnShape::SyncVoid,
            MethodInvoker::sync_void(|_: &(), _, _| Ok(())),
        );
        let descriptor = Arc::new(MethodDescriptor::for_tests("/test", metadata));
        let call = CallContext::new(
            request.id.clone(),
            "/test",
            &request.method,
            Arc::new(caller),
            Arc::new(services),
            None,
        );
        ExecutionContext::new(request, descriptor, call)
    }

    #[test]
    fn test_service_provider_lookup() {
        let services = ServiceProvider::new().with(Arc::new(41u32));
        assert_eq!(services.get::<u32>().as_deref(), Some(&41));
        assert!(services.get::<String>().is_none());
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn test_first_short_circuit_wins() {
        let mut ctx = context_for(JsonRpcRequest::new("noop", json!([]), Id::Number(1)));

        assert!(ctx.deny(Error::Unauthorized("first".into())));
        assert!(!ctx.continue_request());
        assert!(!ctx.deny(Error::Internal("second".into())));
        assert!(!ctx.set_response(Ok(json!("overwrite"))));
        assert!(!ctx.short_circuit(Ok(json!("again"))));

        match ctx.response() {
            Some(Err(Error::Unauthorized(msg))) => assert_eq!(msg, "first"),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_fault_keeps_earlier_denial() {
        let mut ctx = context_for(JsonRpcRequest::new("noop", json!([]), Id::Number(1)));
        ctx.deny(Error::Unauthorized("denied".into()));
        ctx.fault(Error::Internal("late".into()));

        assert_eq!(ctx.state(), ExecutionState::Faulted);
        assert!(matches!(ctx.response(), Some(Err(Error::Unauthorized(_)))));
    }

    #[test]
    fn test_set_response_while_running() {
        let mut ctx = context_for(JsonRpcRequest::new("noop", json!([]), Id::Number(1)));
        assert!(ctx.set_response(Ok(json!(1))));
        assert!(ctx.set_response(Ok(json!(2))));
        assert!(ctx.continue_request());
        assert!(matches!(ctx.response(), Some(Ok(v)) if *v == json!(2)));
    }
}
