//! Method invocation and instance activation
//!
//! A [`MethodInvoker`] is built once per method and adapts the four method
//! shapes (sync or async, void or value) to one callable:
//! `(instance, args, call) -> future of Result<Value>`. Void methods yield
//! `null`. Async methods are awaited on the caller's runtime; nothing blocks.
//!
//! The invoker does not create instances. An [`Activation`] strategy does,
//! once per call, before filters run.

use crate::binder::BoundArguments;
use crate::context::CallContext;
use crate::descriptor::ReturnShape;
use futures::future::{self, BoxFuture};
use rpcflow_core::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A type-erased service instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Future returned by [`MethodInvoker::invoke`]
pub type InvokeFuture = BoxFuture<'static, Result<Value>>;

type InvokeFn = dyn Fn(Instance, BoundArguments, CallContext) -> InvokeFuture + Send + Sync;

pub(crate) type Activator = Arc<dyn Fn(&CallContext) -> Result<Instance> + Send + Sync>;

fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        Error::Internal(format!(
            "activated instance is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

fn to_value<R: Serialize>(value: R) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Uniform callable for one exposed method
#[derive(Clone)]
pub struct MethodInvoker {
    shape: ReturnShape,
    call: Arc<InvokeFn>,
}

impl MethodInvoker {
    /// A synchronous method producing a value
    pub fn sync_value<T, R, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        R: Serialize,
        F: Fn(&T, BoundArguments, &CallContext) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            shape: ReturnShape::SyncValue,
            call: Arc::new(
                move |instance: Instance, args: BoundArguments, call: CallContext| -> InvokeFuture {
                    let outcome = downcast::<T>(instance)
                        .and_then(|this| f(this.as_ref(), args, &call))
                        .and_then(to_value);
                    Box::pin(future::ready(outcome))
                },
            ),
        }
    }

    /// A synchronous method producing nothing
    pub fn sync_void<T, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, BoundArguments, &CallContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            shape: ReturnShape::SyncVoid,
            call: Arc::new(
                move |instance: Instance, args: BoundArguments, call: CallContext| -> InvokeFuture {
                    let outcome = downcast::<T>(instance)
                        .and_then(|this| f(this.as_ref(), args, &call))
                        .map(|()| Value::Null);
                    Box::pin(future::ready(outcome))
                },
            ),
        }
    }

    /// An async method producing a value
    pub fn async_value<T, R, F, Fut>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        R: Serialize,
        F: Fn(Arc<T>, BoundArguments, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self {
            shape: ReturnShape::AsyncValue,
            call: Arc::new(
                move |instance: Instance, args: BoundArguments, call: CallContext| -> InvokeFuture {
                    match downcast::<T>(instance) {
                        Ok(this) => {
                            let pending = f(this, args, call);
                            Box::pin(async move { to_value(pending.await?) })
                        }
                        Err(e) => Box::pin(future::ready(Err(e))),
                    }
                },
            ),
        }
    }

    /// An async method producing nothing
    pub fn async_void<T, F, Fut>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, BoundArguments, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            shape: ReturnShape::AsyncVoid,
            call: Arc::new(
                move |instance: Instance, args: BoundArguments, call: CallContext| -> InvokeFuture {
                    match downcast::<T>(instance) {
                        Ok(this) => {
                            let pending = f(this, args, call);
                            Box::pin(async move { pending.await.map(|()| Value::Null) })
                        }
                        Err(e) => Box::pin(future::ready(Err(e))),
                    }
                },
            ),
        }
    }

    /// Shape this invoker was built for
    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    /// Runs the method against an activated instance
    pub fn invoke(&self, instance: Instance, args: BoundArguments, call: CallContext) -> InvokeFuture {
        (self.call)(instance, args, call)
    }
}

impl fmt::Debug for MethodInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvoker")
            .field("shape", &self.shape)
            .finish()
    }
}

/// How the target instance of a call is obtained
pub enum Activation<T> {
    /// One instance shared by every call
    Shared(Arc<T>),
    /// A factory run once per call
    Factory(Arc<dyn Fn(&CallContext) -> Result<Arc<T>> + Send + Sync>),
    /// Looked up by type in the endpoint's service provider
    Resolve,
}

impl<T: Send + Sync + 'static> Activation<T> {
    /// Shares `instance` across calls
    pub fn shared(instance: T) -> Self {
        Activation::Shared(Arc::new(instance))
    }

    /// Builds an instance per call
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&CallContext) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Activation::Factory(Arc::new(f))
    }

    pub(crate) fn into_activator(self) -> Activator {
        match self {
            Activation::Shared(instance) => Arc::new(move |_: &CallContext| -> Result<Instance> {
                let shared: Instance = instance.clone();
                Ok(shared)
            }),
            Activation::Factory(factory) => Arc::new(move |call: &CallContext| -> Result<Instance> {
                let instance: Instance = factory(call)?;
                Ok(instance)
            }),
            Activation::Resolve => Arc::new(|call: &CallContext| -> Result<Instance> {
                let service: Instance = call.services().get::<T>().ok_or_else(|| {
                    Error::Internal(format!(
                        "no service registered for {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                Ok(service)
            }),
        }
    }
}

impl<T> fmt::Debug for Activation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Shared(_) => f.write_str("Activation::Shared"),
            Activation::Factory(_) => f.write_str("Activation::Factory"),
            Activation::Resolve => f.write_str("Activation::Resolve"),
        }
    }
}
