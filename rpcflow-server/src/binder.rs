//! Parameter binding
//!
//! Turns a request's raw `params` into a positional argument array matching
//! the method signature. The wire shape selects the strategy:
//!
//! - **Positional** (`[..]`, or no `params`): at most as many values as
//!   declared wire parameters; trailing omitted parameters must be optional.
//! - **Named** (`{..}`): exact-name lookup per declared parameter; omitted
//!   optional parameters take their default; unknown keys are ignored.
//!
//! Injected parameters are skipped and left as `null` in their slot for the
//! invoker to fill. Each strategy is compiled once per descriptor and cached.

use crate::descriptor::ParameterInfo;
use rpcflow_core::{Error, Params, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Binding strategy selected by the shape of `params`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Bind by position
    Positional,
    /// Bind by name
    Named,
}

impl BindingStrategy {
    /// Strategy for a wire payload
    pub fn for_params(params: &Params) -> Self {
        match params {
            Params::Named(_) => BindingStrategy::Named,
            Params::Positional(_) | Params::None => BindingStrategy::Positional,
        }
    }
}

/// Arguments in signature order, ready for the invoker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArguments {
    values: Vec<Value>,
}

impl BoundArguments {
    /// Wraps already bound values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// All slots, injected ones included as `null`
    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the method takes no parameters
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value in slot `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Moves slot `index` out as a typed value
    pub fn take<T: DeserializeOwned>(&mut self, index: usize) -> Result<T> {
        let value = self
            .values
            .get_mut(index)
            .map(Value::take)
            .unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidParams(format!("argument {}: {}", index, e)))
    }

    /// Consumes the arguments
    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

type CompiledBinder = Box<dyn Fn(&Params) -> Result<BoundArguments> + Send + Sync>;

/// Per-descriptor cache of compiled binders, one per strategy
#[derive(Default)]
pub(crate) struct BinderCache {
    positional: OnceLock<CompiledBinder>,
    named: OnceLock<CompiledBinder>,
}

impl BinderCache {
    pub(crate) fn bind(&self, declared: &[ParameterInfo], params: &Params) -> Result<BoundArguments> {
        let binder = match BindingStrategy::for_params(params) {
            BindingStrategy::Positional => self
                .positional
                .get_or_init(|| compile_positional(declared)),
            BindingStrategy::Named => self.named.get_or_init(|| compile_named(declared)),
        };
        binder(params)
    }

    #[cfg(test)]
    fn is_compiled(&self, strategy: BindingStrategy) -> bool {
        match strategy {
            BindingStrategy::Positional => self.positional.get().is_some(),
            BindingStrategy::Named => self.named.get().is_some(),
        }
    }
}

struct BindPlan {
    slots: usize,
    wire: Vec<ParameterInfo>,
}

impl BindPlan {
    fn new(declared: &[ParameterInfo]) -> Self {
        Self {
            slots: declared.len(),
            wire: declared.iter().filter(|p| p.is_wire()).cloned().collect(),
        }
    }

    fn resolve(&self, param: &ParameterInfo, supplied: Option<&Value>) -> Result<Value> {
        let value = match supplied {
            Some(value) => value.clone(),
            None if param.optional => param.default_value(),
            None => {
                return Err(Error::binding(
                    &param.name,
                    &param.type_name,
                    "missing required parameter",
                ))
            }
        };
        param
            .check(&value)
            .map_err(|reason| Error::binding(&param.name, &param.type_name, reason))?;
        Ok(value)
    }

    fn place(&self, values: &mut [Value], param: &ParameterInfo, value: Value) -> Result<()> {
        let slot = values.get_mut(param.index).ok_or_else(|| {
            Error::Configuration(format!(
                "parameter '{}' has index {} but the method declares {} parameters",
                param.name, param.index, self.slots
            ))
        })?;
        *slot = value;
        Ok(())
    }
}

fn compile_positional(declared: &[ParameterInfo]) -> CompiledBinder {
    let plan = BindPlan::new(declared);
    Box::new(move |params: &Params| {
        let supplied: &[Value] = match params {
            Params::Positional(values) => values,
            Params::None => &[],
            Params::Named(_) => {
                return Err(Error::InvalidParams("expected positional parameters".into()))
            }
        };
        if supplied.len() > plan.wire.len() {
            return Err(Error::InvalidParams(format!(
                "expected at most {} parameters, got {}",
                plan.wire.len(),
                supplied.len()
            )));
        }

        let mut values = vec![Value::Null; plan.slots];
        for (position, param) in plan.wire.iter().enumerate() {
            let value = plan.resolve(param, supplied.get(position))?;
            plan.place(&mut values, param, value)?;
        }
        Ok(BoundArguments::new(values))
    })
}

fn compile_named(declared: &[ParameterInfo]) -> CompiledBinder {
    let plan = BindPlan::new(declared);
    Box::new(move |params: &Params| {
        let empty = Map::new();
        let supplied = match params {
            Params::Named(map) => map,
            Params::None => &empty,
            Params::Positional(_) => {
                return Err(Error::InvalidParams("expected named parameters".into()))
            }
        };

        let mut values = vec![Value::Null; plan.slots];
        for param in &plan.wire {
            let value = plan.resolve(param, supplied.get(&param.name))?;
            plan.place(&mut values, param, value)?;
        }
        Ok(BoundArguments::new(values))
    })
}
