//! Method metadata and descriptors
//!
//! Rust has no runtime reflection, so every exposed service describes its own
//! methods through [`ExposedService`]. The `#[rpc_service]` attribute from
//! `rpcflow-macros` writes that impl; it can also be written by hand.
//!
//! [`MethodMetadata`] is what a service says about one method. A
//! [`MethodDescriptor`] is what the registry makes of it for one route: the
//! metadata plus naming conventions, authorization checks, filters and the
//! cached binder and invoker. Descriptors are built once at configuration time
//! and never change afterwards.

use crate::authorization::{AuthorizationPolicy, MethodAuthorization};
use crate::binder::{BinderCache, BoundArguments};
use crate::filter::FilterFactory;
use crate::invoker::{Activator, MethodInvoker};
use rpcflow_core::{Params, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Checks that a raw value converts to a parameter's declared type
pub type TypeCheck = fn(&Value) -> std::result::Result<(), String>;

/// [`TypeCheck`] for any deserializable type
pub fn type_check<T: DeserializeOwned>(value: &Value) -> std::result::Result<(), String> {
    <T as Deserialize>::deserialize(value).map(drop).map_err(|e| e.to_string())
}

/// Where a parameter's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource {
    /// Bound from the request's `params`
    Wire,
    /// Supplied by the invoker (the call context), never bound from JSON
    Injected,
}

/// One declared parameter of an exposed method
#[derive(Clone)]
pub struct ParameterInfo {
    /// Declared name, used for named binding
    pub name: String,
    /// Position in the method signature
    pub index: usize,
    /// Declared type, reported in binding errors
    pub type_name: String,
    /// Whether the parameter may be omitted
    pub optional: bool,
    /// Value bound when an optional parameter is omitted
    pub default: Option<Value>,
    /// Wire or injected
    pub source: ParameterSource,
    check: Option<TypeCheck>,
}

impl ParameterInfo {
    /// A required wire parameter of type `T`
    pub fn wire<T: DeserializeOwned>(index: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            type_name: std::any::type_name::<T>().to_string(),
            optional: false,
            default: None,
            source: ParameterSource::Wire,
            check: Some(type_check::<T>),
        }
    }

    /// A parameter filled by the invoker rather than the request
    pub fn injected(index: usize, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            type_name: type_name.into(),
            optional: true,
            default: None,
            source: ParameterSource::Injected,
            check: None,
        }
    }

    /// Marks the parameter optional; omitted values bind as `null`
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the parameter optional with a default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    /// Overrides the reported type name
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// True for parameters bound from JSON
    pub fn is_wire(&self) -> bool {
        self.source == ParameterSource::Wire
    }

    /// Value bound when the parameter is omitted
    pub fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    /// Converts `value` to the declared type, reporting why it failed
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match self.check {
            Some(check) => check(value),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ParameterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterInfo")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("type_name", &self.type_name)
            .field("optional", &self.optional)
            .field("default", &self.default)
            .field("source", &self.source)
            .finish()
    }
}

/// How a method returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// `fn m(&self, ..)` returning nothing
    SyncVoid,
    /// `fn m(&self, ..) -> T`
    SyncValue,
    /// `async fn m(&self, ..)` returning nothing
    AsyncVoid,
    /// `async fn m(&self, ..) -> T`
    AsyncValue,
}

impl ReturnShape {
    /// True for async methods
    pub fn is_async(self) -> bool {
        matches!(self, ReturnShape::AsyncVoid | ReturnShape::AsyncValue)
    }

    /// True for methods that produce `null`
    pub fn is_void(self) -> bool {
        matches!(self, ReturnShape::SyncVoid | ReturnShape::AsyncVoid)
    }
}

/// What a service declares about one of its methods
#[derive(Clone)]
pub struct MethodMetadata {
    /// Method name before naming conventions
    pub name: String,
    /// Declared parameters in signature order
    pub params: Vec<ParameterInfo>,
    /// Return shape
    pub shape: ReturnShape,
    /// Declared return type, for documentation
    pub return_type: String,
    /// Whether documentation generators should list the method
    pub documented: bool,
    pub(crate) invoker: MethodInvoker,
}

impl MethodMetadata {
    /// Metadata for a method with no parameters yet
    pub fn new(name: impl Into<String>, shape: ReturnShape, invoker: MethodInvoker) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            shape,
            return_type: if shape.is_void() { "()" } else { "" }.to_string(),
            documented: true,
            invoker,
        }
    }

    /// Appends a parameter
    pub fn param(mut self, param: ParameterInfo) -> Self {
        self.params.push(param);
        self
    }

    /// Records the declared return type
    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = type_name.into();
        self
    }

    /// Hides the method from documentation generators
    pub fn undocumented(mut self) -> Self {
        self.documented = false;
        self
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("shape", &self.shape)
            .field("return_type", &self.return_type)
            .finish()
    }
}

/// A type whose methods can be exposed over JSON-RPC
///
/// Usually generated by `#[rpc_service]`:
///
/// ```rust,ignore
/// #[rpc_service]
/// impl Calculator {
///     pub fn add(&self, a: i64, b: i64) -> i64 { a + b }
/// }
/// ```
pub trait ExposedService: Send + Sync + 'static {
    /// Type name, the default route name
    fn service_name() -> &'static str;

    /// Metadata of every exposed method
    fn methods() -> Vec<MethodMetadata>;
}

/// A method as seen by method filters and filter selectors at registration time
#[derive(Debug, Clone, Copy)]
pub struct MethodCandidate<'a> {
    /// Owning service type name
    pub service: &'a str,
    /// Method metadata
    pub metadata: &'a MethodMetadata,
}

/// Everything needed to serve one (route, method) pair
pub struct MethodDescriptor {
    pub(crate) route: String,
    pub(crate) method: String,
    pub(crate) service: String,
    pub(crate) params: Vec<ParameterInfo>,
    pub(crate) shape: ReturnShape,
    pub(crate) return_type: String,
    pub(crate) authorizations: Vec<Arc<dyn MethodAuthorization>>,
    pub(crate) authorization_policy: AuthorizationPolicy,
    pub(crate) filters: Vec<FilterFactory>,
    pub(crate) success_status: u16,
    pub(crate) documented: bool,
    pub(crate) invoker: MethodInvoker,
    pub(crate) activator: Activator,
    pub(crate) binders: BinderCache,
}

impl MethodDescriptor {
    /// Normalized route
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Method name after naming conventions
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Owning service type name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Declared parameters, injected ones included
    pub fn params(&self) -> &[ParameterInfo] {
        &self.params
    }

    /// Return shape
    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    /// Declared return type
    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    /// Authorization checks in evaluation order
    pub fn authorizations(&self) -> &[Arc<dyn MethodAuthorization>] {
        &self.authorizations
    }

    /// How the checks combine
    pub fn authorization_policy(&self) -> AuthorizationPolicy {
        self.authorization_policy
    }

    /// Number of filter factories attached
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Status code for successful single responses
    pub fn success_status(&self) -> u16 {
        self.success_status
    }

    /// Whether documentation generators should list the method
    pub fn documented(&self) -> bool {
        self.documented
    }

    /// Binds raw params using the cached binder for their shape
    pub fn bind(&self, params: &Params) -> Result<BoundArguments> {
        self.binders.bind(&self.params, params)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(route: &str, metadata: MethodMetadata) -> Self {
        Self {
            route: route.to_string(),
            method: metadata.name.clone(),
            service: "Test".to_string(),
            params: metadata.params,
            shape: metadata.shape,
            return_type: metadata.return_type,
            authorizations: Vec::new(),
            authorization_policy: AuthorizationPolicy::default(),
            filters: Vec::new(),
            success_status: 200,
            documented: metadata.documented,
            invoker: metadata.invoker,
            activator: Arc::new(|_: &crate::context::CallContext| {
                Ok(Arc::new(()) as Arc<dyn std::any::Any + Send + Sync>)
            }),
            binders: BinderCache::default(),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("route", &self.route)
            .field("method", &self.method)
            .field("service", &self.service)
            .field("params", &self.params)
            .field("shape", &self.shape)
            .field("authorizations", &self.authorizations.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_parameter_checks_type() {
        let param = ParameterInfo::wire::<i64>(0, "a");
        assert!(param.check(&json!(5)).is_ok());
        assert!(param.check(&json!("five")).is_err());
        assert!(!param.optional);
        assert_eq!(param.type_name, "i64");
    }

    #[test]
    fn test_default_makes_optional() {
        let param = ParameterInfo::wire::<i64>(1, "b").with_default(json!(10));
        assert!(param.optional);
        assert_eq!(param.default_value(), json!(10));

        let nullable = ParameterInfo::wire::<Option<i64>>(2, "c").optional();
        assert_eq!(nullable.default_value(), Value::Null);
        assert!(nullable.check(&Value::Null).is_ok());
    }

    #[test]
    fn test_return_shapes() {
        assert!(ReturnShape::AsyncVoid.is_async());
        assert!(ReturnShape::AsyncVoid.is_void());
        assert!(!ReturnShape::SyncValue.is_void());
        assert!(!ReturnShape::SyncValue.is_async());
    }
}
