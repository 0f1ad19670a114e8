//! API configuration and snapshots
//!
//! [`ApiConfiguration`] collects authorization providers, filter providers,
//! route prefixes, method filters and naming conventions. Each list lives in
//! an [`AtomicList`], so configuration calls take `&self` and may race
//! without locks.
//!
//! Exposing a service captures the [`ConfigurationSnapshot`] current at that
//! moment. Settings changed afterwards affect only services exposed later:
//!
//! ```rust,ignore
//! api.authorize(Requirement::Role("admin".into()))
//!     .expose::<AdminService>(Activation::Resolve)   // requires "admin"
//!     .clear_authorize()
//!     .expose::<PublicService>(Activation::Resolve); // open
//! ```
//!
//! Snapshots are immutable. A new one is built only when a list head, the
//! naming conventions or a flag changed since the last one was issued.

use crate::authorization::{
    AuthorizationPolicy, MethodAuthorization, UserAuthenticated, UserHasPolicy, UserHasRole,
};
use crate::descriptor::{ExposedService, MethodCandidate, MethodMetadata};
use crate::filter::FilterFactory;
use crate::invoker::{Activation, Activator};
use arc_swap::{ArcSwap, ArcSwapOption};
use rpcflow_core::{AtomicList, PersistentList};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Authorization checks for a service type name
pub type AuthorizationProvider =
    Arc<dyn Fn(&str) -> Vec<Arc<dyn MethodAuthorization>> + Send + Sync>;

/// Filter factory for a method, or `None` when the selector rejects it
pub type FilterProvider =
    Arc<dyn Fn(&MethodCandidate<'_>) -> Option<FilterFactory> + Send + Sync>;

/// Route prefixes for a service type name
pub type PrefixProvider = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Decides whether a method is exposed at all
pub type MethodPredicate = Arc<dyn Fn(&MethodCandidate<'_>) -> bool + Send + Sync>;

type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Built-in authorization requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Caller must be authenticated
    Authenticated,
    /// Caller must hold the role
    Role(String),
    /// Caller must satisfy the named policy
    Policy(String),
}

impl Requirement {
    fn into_check(self) -> Arc<dyn MethodAuthorization> {
        match self {
            Requirement::Authenticated => Arc::new(UserAuthenticated),
            Requirement::Role(role) => Arc::new(UserHasRole::new(role)),
            Requirement::Policy(policy) => Arc::new(UserHasPolicy::new(policy)),
        }
    }
}

/// Functions deriving route and method names
#[derive(Clone)]
pub struct NamingConventions {
    route_name: NameFn,
    method_name: NameFn,
}

impl NamingConventions {
    pub fn new<R, M>(route_name: R, method_name: M) -> Self
    where
        R: Fn(&str) -> String + Send + Sync + 'static,
        M: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            route_name: Arc::new(route_name),
            method_name: Arc::new(method_name),
        }
    }

    /// Route name for a service type name
    pub fn route_name(&self, service: &str) -> String {
        (self.route_name)(service)
    }

    /// Wire name for a method name
    pub fn method_name(&self, method: &str) -> String {
        (self.method_name)(method)
    }
}

impl Default for NamingConventions {
    fn default() -> Self {
        Self::new(|service: &str| service.to_string(), |method: &str| method.to_string())
    }
}

impl fmt::Debug for NamingConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NamingConventions")
    }
}

/// Immutable view of the configuration at one point in time
pub struct ConfigurationSnapshot {
    version: u64,
    authorizations: PersistentList<AuthorizationProvider>,
    filters: PersistentList<FilterProvider>,
    prefixes: PersistentList<PrefixProvider>,
    method_filters: PersistentList<MethodPredicate>,
    naming: Arc<NamingConventions>,
    documentation: bool,
    compression: bool,
    policy: AuthorizationPolicy,
}

impl ConfigurationSnapshot {
    /// Monotonically increasing build number
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn naming(&self) -> &NamingConventions {
        &self.naming
    }

    pub fn documentation_enabled(&self) -> bool {
        self.documentation
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    pub fn authorization_policy(&self) -> AuthorizationPolicy {
        self.policy
    }

    /// Checks from every provider, in registration order
    pub fn authorizations_for(&self, service: &str) -> Vec<Arc<dyn MethodAuthorization>> {
        let mut checks = Vec::new();
        self.authorizations
            .visit(|provider| checks.extend(provider(service)), true);
        checks
    }

    /// Route prefixes for `service`; a single empty prefix when none apply
    pub fn prefixes_for(&self, service: &str) -> Vec<String> {
        let mut prefixes = Vec::new();
        self.prefixes
            .visit(|provider| prefixes.extend(provider(service)), true);
        if prefixes.is_empty() {
            prefixes.push(String::new());
        }
        prefixes
    }

    /// True when every method filter accepts the candidate
    pub fn accepts(&self, candidate: &MethodCandidate<'_>) -> bool {
        self.method_filters.iter().all(|accept| accept(candidate))
    }

    /// Filter factories whose selector accepted the candidate, in registration order
    pub fn filters_for(&self, candidate: &MethodCandidate<'_>) -> Vec<FilterFactory> {
        let mut factories = Vec::new();
        self.filters.visit(
            |provider| {
                if let Some(factory) = provider(candidate) {
                    factories.push(factory);
                }
            },
            true,
        );
        factories
    }

    fn is_current(&self, inputs: &SnapshotInputs) -> bool {
        self.authorizations.ptr_eq(&inputs.authorizations)
            && self.filters.ptr_eq(&inputs.filters)
            && self.prefixes.ptr_eq(&inputs.prefixes)
            && self.method_filters.ptr_eq(&inputs.method_filters)
            && Arc::ptr_eq(&self.naming, &inputs.naming)
            && self.documentation == inputs.documentation
            && self.compression == inputs.compression
            && self.policy == inputs.policy
    }
}

impl fmt::Debug for ConfigurationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationSnapshot")
            .field("version", &self.version)
            .field("authorizations", &self.authorizations.len())
            .field("filters", &self.filters.len())
            .field("prefixes", &self.prefixes.len())
            .field("method_filters", &self.method_filters.len())
            .field("documentation", &self.documentation)
            .field("compression", &self.compression)
            .field("policy", &self.policy)
            .finish()
    }
}

struct SnapshotInputs {
    authorizations: PersistentList<AuthorizationProvider>,
    filters: PersistentList<FilterProvider>,
    prefixes: PersistentList<PrefixProvider>,
    method_filters: PersistentList<MethodPredicate>,
    naming: Arc<NamingConventions>,
    documentation: bool,
    compression: bool,
    policy: AuthorizationPolicy,
}

/// One exposed service with the snapshot it was exposed under
#[derive(Clone)]
pub(crate) struct Exposure {
    pub(crate) service: &'static str,
    pub(crate) route_name: Option<String>,
    pub(crate) methods: Vec<MethodMetadata>,
    pub(crate) activator: Activator,
    pub(crate) snapshot: Arc<ConfigurationSnapshot>,
}

/// A method that will be registered, as listed by [`ApiConfiguration::exposed_methods`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedMethod {
    /// Owning service type name
    pub service: &'static str,
    /// Route name override, if any
    pub route_name: Option<String>,
    /// Method name before naming conventions
    pub method: String,
}

/// Source of exposures, for grouping configuration in modules
pub trait ExposureProvider {
    fn provide(&self, api: &ApiConfiguration);
}

impl<F: Fn(&ApiConfiguration)> ExposureProvider for F {
    fn provide(&self, api: &ApiConfiguration) {
        self(api)
    }
}

/// Lock-free configuration store
pub struct ApiConfiguration {
    authorizations: AtomicList<AuthorizationProvider>,
    filters: AtomicList<FilterProvider>,
    prefixes: AtomicList<PrefixProvider>,
    method_filters: AtomicList<MethodPredicate>,
    exposures: AtomicList<Arc<Exposure>>,
    naming: ArcSwap<NamingConventions>,
    documentation: AtomicBool,
    compression: AtomicBool,
    any_policy: AtomicBool,
    version: AtomicU64,
    cached: ArcSwapOption<ConfigurationSnapshot>,
}

impl ApiConfiguration {
    pub fn new() -> Self {
        Self {
            authorizations: AtomicList::new(),
            filters: AtomicList::new(),
            prefixes: AtomicList::new(),
            method_filters: AtomicList::new(),
            exposures: AtomicList::new(),
            naming: ArcSwap::from_pointee(NamingConventions::default()),
            documentation: AtomicBool::new(true),
            compression: AtomicBool::new(false),
            any_policy: AtomicBool::new(false),
            version: AtomicU64::new(0),
            cached: ArcSwapOption::empty(),
        }
    }

    /// Requires `requirement` for services exposed from now on
    pub fn authorize(&self, requirement: Requirement) -> &Self {
        let checks = vec![requirement.into_check()];
        self.authorize_with(move |_| checks.clone())
    }

    /// Adds checks computed from the service type name
    pub fn authorize_with<F>(&self, provider: F) -> &Self
    where
        F: Fn(&str) -> Vec<Arc<dyn MethodAuthorization>> + Send + Sync + 'static,
    {
        self.authorizations.thread_safe_add(Arc::new(provider));
        self
    }

    pub fn clear_authorize(&self) -> &Self {
        self.authorizations.thread_safe_empty();
        self
    }

    /// Adds a route prefix
    pub fn prefix(&self, prefix: impl Into<String>) -> &Self {
        let prefixes = vec![prefix.into()];
        self.prefix_with(move |_| prefixes.clone())
    }

    /// Adds prefixes computed from the service type name
    pub fn prefix_with<F>(&self, provider: F) -> &Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.prefixes.thread_safe_add(Arc::new(provider));
        self
    }

    pub fn clear_prefixes(&self) -> &Self {
        self.prefixes.thread_safe_empty();
        self
    }

    /// Attaches `factory` to every method `selector` accepts
    pub fn apply_filter<W>(&self, selector: W, factory: FilterFactory) -> &Self
    where
        W: Fn(&MethodCandidate<'_>) -> bool + Send + Sync + 'static,
    {
        self.apply_filter_with(move |candidate| selector(candidate).then(|| factory.clone()))
    }

    /// Adds a filter provider deciding per method
    pub fn apply_filter_with<F>(&self, provider: F) -> &Self
    where
        F: Fn(&MethodCandidate<'_>) -> Option<FilterFactory> + Send + Sync + 'static,
    {
        self.filters.thread_safe_add(Arc::new(provider));
        self
    }

    /// Exposes only methods every predicate accepts
    pub fn method_filter<F>(&self, predicate: F) -> &Self
    where
        F: Fn(&MethodCandidate<'_>) -> bool + Send + Sync + 'static,
    {
        self.method_filters.thread_safe_add(Arc::new(predicate));
        self
    }

    pub fn clear_method_filters(&self) -> &Self {
        self.method_filters.thread_safe_empty();
        self
    }

    /// Replaces the route and method naming functions
    pub fn naming_conventions<R, M>(&self, route_name: R, method_name: M) -> &Self
    where
        R: Fn(&str) -> String + Send + Sync + 'static,
        M: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.naming
            .store(Arc::new(NamingConventions::new(route_name, method_name)));
        self
    }

    pub fn disable_documentation(&self) -> &Self {
        self.documentation.store(false, Ordering::Release);
        self
    }

    pub fn enable_compression(&self) -> &Self {
        self.compression.store(true, Ordering::Release);
        self
    }

    /// How multiple checks on one method combine
    pub fn authorization_policy(&self, policy: AuthorizationPolicy) -> &Self {
        self.any_policy
            .store(policy == AuthorizationPolicy::Any, Ordering::Release);
        self
    }

    /// Exposes `T` under its default route name
    pub fn expose<T: ExposedService>(&self, activation: Activation<T>) -> &Self {
        self.push_exposure::<T>(None, activation)
    }

    /// Exposes `T` under `route_name`; an empty name mounts it on the prefix itself
    pub fn expose_as<T: ExposedService>(
        &self,
        route_name: impl Into<String>,
        activation: Activation<T>,
    ) -> &Self {
        self.push_exposure::<T>(Some(route_name.into()), activation)
    }

    /// Exposes a single shared instance
    pub fn expose_instance<T: ExposedService>(&self, instance: T) -> &Self {
        self.expose(Activation::shared(instance))
    }

    fn push_exposure<T: ExposedService>(
        &self,
        route_name: Option<String>,
        activation: Activation<T>,
    ) -> &Self {
        let exposure = Exposure {
            service: T::service_name(),
            route_name,
            methods: T::methods(),
            activator: activation.into_activator(),
            snapshot: self.current_snapshot(),
        };
        tracing::debug!(
            service = exposure.service,
            methods = exposure.methods.len(),
            snapshot = exposure.snapshot.version(),
            "Service exposed"
        );
        self.exposures.thread_safe_add(Arc::new(exposure));
        self
    }

    /// Lets `provider` add its exposures
    pub fn add_exposures<P: ExposureProvider + ?Sized>(&self, provider: &P) -> &Self {
        provider.provide(self);
        self
    }

    /// Every method exposed so far, before method filters and naming
    pub fn exposed_methods(&self) -> Vec<ExposedMethod> {
        self.exposures()
            .iter()
            .flat_map(|exposure| {
                exposure.methods.iter().map(|m| ExposedMethod {
                    service: exposure.service,
                    route_name: exposure.route_name.clone(),
                    method: m.name.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn exposures(&self) -> Vec<Arc<Exposure>> {
        self.exposures.load().to_vec()
    }

    /// The snapshot for the current settings
    ///
    /// Returns the cached snapshot unless a list head, the naming conventions
    /// or a flag changed since it was built.
    pub fn current_snapshot(&self) -> Arc<ConfigurationSnapshot> {
        let inputs = SnapshotInputs {
            authorizations: self.authorizations.load(),
            filters: self.filters.load(),
            prefixes: self.prefixes.load(),
            method_filters: self.method_filters.load(),
            naming: self.naming.load_full(),
            documentation: self.documentation.load(Ordering::Acquire),
            compression: self.compression.load(Ordering::Acquire),
            policy: if self.any_policy.load(Ordering::Acquire) {
                AuthorizationPolicy::Any
            } else {
                AuthorizationPolicy::All
            },
        };

        if let Some(cached) = self.cached.load_full() {
            if cached.is_current(&inputs) {
                return cached;
            }
        }

        let snapshot = Arc::new(ConfigurationSnapshot {
            version: self.version.fetch_add(1, Ordering::AcqRel) + 1,
            authorizations: inputs.authorizations,
            filters: inputs.filters,
            prefixes: inputs.prefixes,
            method_filters: inputs.method_filters,
            naming: inputs.naming,
            documentation: inputs.documentation,
            compression: inputs.compression,
            policy: inputs.policy,
        });
        self.cached.store(Some(snapshot.clone()));
        snapshot
    }
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ApiConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfiguration")
            .field("exposures", &self.exposures.load().len())
            .field("snapshot", &self.cached.load_full())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::AllowAll;
    use crate::descriptor::ReturnShape;
    use crate::filter::{LoggingFilter, ValidationFilter};
    use crate::invoker::MethodInvoker;

    struct Greeter;

    impl ExposedService for Greeter {
        fn service_name() -> &'static str {
            "Greeter"
        }

        fn methods() -> Vec<MethodMetadata> {
            vec![
                MethodMetadata::new(
                    "hello",
                    ReturnShape::SyncValue,
                    MethodInvoker::sync_value(|_: &Greeter, _, _| Ok("hi")),
                ),
                MethodMetadata::new(
                    "internal",
                    ReturnShape::SyncVoid,
                    MethodInvoker::sync_void(|_: &Greeter, _, _| Ok(())),
                ),
            ]
        }
    }

    fn candidate<'a>(metadata: &'a MethodMetadata) -> MethodCandidate<'a> {
        MethodCandidate {
            service: "Greeter",
            metadata,
        }
    }

    #[test]
    fn test_snapshot_reused_until_something_changes() {
        let api = ApiConfiguration::new();
        let first = api.current_snapshot();
        let again = api.current_snapshot();
        assert!(Arc::ptr_eq(&first, &again));

        api.prefix("v1");
        let changed = api.current_snapshot();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert!(changed.version() > first.version());

        api.enable_compression();
        let flagged = api.current_snapshot();
        assert!(flagged.compression_enabled());
        assert!(!Arc::ptr_eq(&changed, &flagged));
    }

    #[test]
    fn test_naming_convention_identity_invalidates_snapshot() {
        let api = ApiConfiguration::new();
        let before = api.current_snapshot();
        api.naming_conventions(|s| s.to_lowercase(), |m| m.to_uppercase());
        let after = api.current_snapshot();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.naming().route_name("Greeter"), "greeter");
        assert_eq!(after.naming().method_name("hello"), "HELLO");
        assert_eq!(before.naming().route_name("Greeter"), "Greeter");
    }

    #[test]
    fn test_issued_snapshot_is_frozen() {
        let api = ApiConfiguration::new();
        api.authorize(Requirement::Authenticated);
        let snapshot = api.current_snapshot();

        api.clear_authorize().authorize(Requirement::Role("a".into()));
        api.authorize_with(|_| vec![Arc::new(AllowAll) as Arc<dyn MethodAuthorization>]);

        assert_eq!(snapshot.authorizations_for("Greeter").len(), 1);
        assert_eq!(api.current_snapshot().authorizations_for("Greeter").len(), 2);
    }

    #[test]
    fn test_prefixes_default_to_root() {
        let api = ApiConfiguration::new();
        assert_eq!(api.current_snapshot().prefixes_for("Greeter"), vec![""]);

        api.prefix("v1")
            .prefix_with(|service| vec![format!("legacy/{}", service.to_lowercase())]);
        assert_eq!(
            api.current_snapshot().prefixes_for("Greeter"),
            vec!["v1", "legacy/greeter"]
        );

        api.clear_prefixes();
        assert_eq!(api.current_snapshot().prefixes_for("Greeter"), vec![""]);
    }

    #[test]
    fn test_method_filters_and_filter_selectors() {
        let api = ApiConfiguration::new();
        api.method_filter(|c| c.metadata.name != "internal")
            .apply_filter(|c| c.metadata.name == "hello", LoggingFilter::factory())
            .apply_filter(|_| true, ValidationFilter::new().into_factory());

        let snapshot = api.current_snapshot();
        let methods = Greeter::methods();
        let hello = candidate(&methods[0]);
        let internal = candidate(&methods[1]);

        assert!(snapshot.accepts(&hello));
        assert!(!snapshot.accepts(&internal));
        assert_eq!(snapshot.filters_for(&hello).len(), 2);
        assert_eq!(snapshot.filters_for(&internal).len(), 1);

        api.clear_method_filters();
        assert!(api.current_snapshot().accepts(&internal));
    }

    #[test]
    fn test_exposure_captures_snapshot() {
        let api = ApiConfiguration::new();
        api.authorize(Requirement::Role("admin".into()))
            .expose_instance(Greeter)
            .clear_authorize()
            .expose_as("open", Activation::shared(Greeter));

        let exposures = api.exposures();
        assert_eq!(exposures.len(), 2);
        assert_eq!(exposures[0].snapshot.authorizations_for("Greeter").len(), 1);
        assert!(exposures[1].snapshot.authorizations_for("Greeter").is_empty());
        assert_eq!(exposures[1].route_name.as_deref(), Some("open"));

        let methods = api.exposed_methods();
        assert_eq!(methods.len(), 4);
        assert_eq!(methods[0].method, "hello");
    }

    #[test]
    fn test_add_exposures_from_provider() {
        let module = |api: &ApiConfiguration| {
            api.prefix("greeting").expose_instance(Greeter);
        };
        let api = ApiConfiguration::new();
        api.add_exposures(&module);

        assert_eq!(api.exposed_methods().len(), 2);
        assert_eq!(
            api.exposures()[0].snapshot.prefixes_for("Greeter"),
            vec!["greeting"]
        );
    }

    #[test]
    fn test_policy_flag() {
        let api = ApiConfiguration::new();
        assert_eq!(
            api.current_snapshot().authorization_policy(),
            AuthorizationPolicy::All
        );
        api.authorization_policy(AuthorizationPolicy::Any);
        assert_eq!(
            api.current_snapshot().authorization_policy(),
            AuthorizationPolicy::Any
        );
        api.disable_documentation();
        assert!(!api.current_snapshot().documentation_enabled());
    }
}
