//! Authorization checks
//!
//! Every descriptor carries an ordered list of [`MethodAuthorization`]
//! checks and an [`AuthorizationPolicy`] that combines them. Checks run
//! before parameter binding against the ambient caller identity.
//!
//! # Combining checks
//!
//! - **All** (default): every check must grant; the first denial stops
//!   evaluation.
//! - **Any**: one granting check suffices; the first grant stops evaluation.
//!
//! An empty list always allows.
//!
//! # Built-in checks
//!
//! - [`AllowAll`]
//! - [`UserAuthenticated`]
//! - [`UserHasRole`]
//! - [`UserHasPolicy`], delegating to a [`PolicyEvaluator`] service
//! - [`Predicate`], an arbitrary async closure

use crate::context::{CallContext, ExecutionContext, ServiceProvider};
use crate::transport::CallerIdentity;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A single authorization check
#[async_trait]
pub trait MethodAuthorization: Send + Sync {
    /// True to grant the call
    async fn authorize(&self, ctx: &ExecutionContext) -> bool;

    /// Name used in logs when the check denies
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// How a descriptor's checks combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthorizationPolicy {
    /// Every check must grant
    #[default]
    All,
    /// At least one check must grant
    Any,
}

impl AuthorizationPolicy {
    /// Runs `checks` in order under this policy
    pub async fn evaluate(
        self,
        checks: &[Arc<dyn MethodAuthorization>],
        ctx: &ExecutionContext,
    ) -> bool {
        if checks.is_empty() {
            return true;
        }

        match self {
            AuthorizationPolicy::All => {
                for check in checks {
                    if !check.authorize(ctx).await {
                        tracing::debug!(check = check.name(), method = %ctx.call().method(), "Authorization denied");
                        return false;
                    }
                }
                true
            }
            AuthorizationPolicy::Any => {
                for check in checks {
                    if check.authorize(ctx).await {
                        return true;
                    }
                }
                tracing::debug!(checks = checks.len(), method = %ctx.call().method(), "No authorization check granted");
                false
            }
        }
    }
}

/// Grants every call
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl MethodAuthorization for AllowAll {
    async fn authorize(&self, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Grants authenticated callers
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAuthenticated;

#[async_trait]
impl MethodAuthorization for UserAuthenticated {
    async fn authorize(&self, ctx: &ExecutionContext) -> bool {
        ctx.caller().authenticated
    }
}

/// Grants callers holding a role
#[derive(Debug, Clone)]
pub struct UserHasRole {
    role: String,
}

impl UserHasRole {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl MethodAuthorization for UserHasRole {
    async fn authorize(&self, ctx: &ExecutionContext) -> bool {
        ctx.caller().is_in_role(&self.role)
    }
}

/// Decides named policies for [`UserHasPolicy`]
///
/// Registered in the endpoint's [`ServiceProvider`] with
/// [`ServiceProvider::with_policy_evaluator`].
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// True when `caller` satisfies `policy`
    async fn evaluate(&self, caller: &CallerIdentity, policy: &str) -> bool;
}

type SharedPolicyEvaluator = Arc<dyn PolicyEvaluator>;

impl ServiceProvider {
    /// Registers the evaluator used by [`UserHasPolicy`]
    pub fn with_policy_evaluator<E: PolicyEvaluator + 'static>(self, evaluator: E) -> Self {
        let shared: SharedPolicyEvaluator = Arc::new(evaluator);
        self.with(Arc::new(shared))
    }
}

/// Grants callers satisfying a named policy
///
/// Denies when no [`PolicyEvaluator`] is registered.
#[derive(Debug, Clone)]
pub struct UserHasPolicy {
    policy: String,
}

impl UserHasPolicy {
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
        }
    }
}

#[async_trait]
impl MethodAuthorization for UserHasPolicy {
    async fn authorize(&self, ctx: &ExecutionContext) -> bool {
        match ctx.call().services().get::<SharedPolicyEvaluator>() {
            Some(evaluator) => evaluator.evaluate(ctx.caller(), &self.policy).await,
            None => {
                tracing::warn!(policy = %self.policy, "No policy evaluator registered; denying");
                false
            }
        }
    }
}

type PredicateFn = dyn Fn(&CallContext) -> BoxFuture<'static, bool> + Send + Sync;

/// Grants calls for which a closure returns true
#[derive(Clone)]
pub struct Predicate {
    check: Arc<PredicateFn>,
}

impl Predicate {
    /// Async predicate; the closure receives an owned copy of the call view
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            check: Arc::new(move |call: &CallContext| -> BoxFuture<'static, bool> {
                Box::pin(f(call.clone()))
            }),
        }
    }

    /// Synchronous predicate
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&CallContext) -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(move |call: &CallContext| -> BoxFuture<'static, bool> {
                Box::pin(futures::future::ready(f(call)))
            }),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

#[async_trait]
impl MethodAuthorization for Predicate {
    async fn authorize(&self, ctx: &ExecutionContext) -> bool {
        (self.check)(ctx.call()).await
    }
}
