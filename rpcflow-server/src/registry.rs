//! Method registry
//!
//! Maps `(route, method)` to a [`MethodDescriptor`]. The map is immutable and
//! published through an [`ArcSwap`]: lookups are plain hash reads against the
//! current table, registration builds a new table and swaps it in with a
//! compare-and-swap loop.
//!
//! Descriptors are derived from the exposures of an [`ApiConfiguration`],
//! each under the snapshot captured when it was exposed. A method reachable
//! under several prefixes gets one descriptor per prefix.

use crate::binder::BinderCache;
use crate::config::ApiConfiguration;
use crate::descriptor::{MethodCandidate, MethodDescriptor};
use arc_swap::ArcSwap;
use rpcflow_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

type RouteTable = HashMap<String, HashMap<String, Arc<MethodDescriptor>>>;

/// Normalizes route segments into `/a/b/c`
///
/// Segments are split on `/`, empty pieces are dropped and the rest joined
/// with a single leading slash. No segments at all yields `/`.
pub fn normalize_route(segments: &[&str]) -> String {
    let parts: Vec<&str> = segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}

/// Immutable lookup table of exposed methods
pub struct MethodRegistry {
    routes: ArcSwap<RouteTable>,
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry").finish_non_exhaustive()
    }
}

impl MethodRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Registry holding every method exposed through `api`, mounted under `base_path`
    pub fn from_configuration(base_path: &str, api: &ApiConfiguration) -> Result<Self> {
        let registry = Self::new();
        registry.register(describe(base_path, api))?;
        Ok(registry)
    }

    /// Publishes `descriptors`
    ///
    /// Fails without publishing anything if any `(route, method)` pair is
    /// already taken, including by another descriptor in the same call.
    pub fn register(&self, descriptors: Vec<MethodDescriptor>) -> Result<()> {
        let incoming: Vec<Arc<MethodDescriptor>> = descriptors.into_iter().map(Arc::new).collect();

        loop {
            let current = self.routes.load_full();
            let mut next: RouteTable = (*current).clone();
            for descriptor in &incoming {
                let methods = next.entry(descriptor.route.clone()).or_default();
                if methods.contains_key(&descriptor.method) {
                    return Err(Error::DuplicateMethod {
                        route: descriptor.route.clone(),
                        method: descriptor.method.clone(),
                    });
                }
                methods.insert(descriptor.method.clone(), descriptor.clone());
            }

            let previous = self.routes.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                tracing::debug!(methods = incoming.len(), "Methods registered");
                return Ok(());
            }
        }
    }

    /// Descriptor for `method` on the normalized `route`
    pub fn lookup(&self, route: &str, method: &str) -> Option<Arc<MethodDescriptor>> {
        self.routes.load().get(route)?.get(method).cloned()
    }

    /// True when anything is registered on `route`
    pub fn has_route(&self, route: &str) -> bool {
        self.routes.load().contains_key(route)
    }

    /// Every descriptor, ordered by route then method
    ///
    /// This is the input for documentation generators.
    pub fn descriptors(&self) -> Vec<Arc<MethodDescriptor>> {
        let routes = self.routes.load();
        let mut all: Vec<Arc<MethodDescriptor>> = routes
            .values()
            .flat_map(|methods| methods.values().cloned())
            .collect();
        all.sort_by(|a, b| (&a.route, &a.method).cmp(&(&b.route, &b.method)));
        all
    }

    /// Number of registered methods
    pub fn len(&self) -> usize {
        self.routes.load().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds descriptors for every exposure of `api`
pub(crate) fn describe(base_path: &str, api: &ApiConfiguration) -> Vec<MethodDescriptor> {
    let mut descriptors = Vec::new();

    for exposure in api.exposures() {
        let snapshot = &exposure.snapshot;
        let route_name = exposure
            .route_name
            .clone()
            .unwrap_or_else(|| snapshot.naming().route_name(exposure.service));
        let prefixes = snapshot.prefixes_for(exposure.service);
        let authorizations = snapshot.authorizations_for(exposure.service);

        for metadata in &exposure.methods {
            let candidate = MethodCandidate {
                service: exposure.service,
                metadata,
            };
            if !snapshot.accepts(&candidate) {
                tracing::trace!(service = exposure.service, method = %metadata.name, "Method filtered out");
                continue;
            }
            let filters = snapshot.filters_for(&candidate);
            let method = snapshot.naming().method_name(&metadata.name);

            for prefix in &prefixes {
                descriptors.push(MethodDescriptor {
                    route: normalize_route(&[base_path, prefix.as_str(), route_name.as_str()]),
                    method: method.clone(),
                    service: exposure.service.to_string(),
                    params: metadata.params.clone(),
                    shape: metadata.shape,
                    return_type: metadata.return_type.clone(),
                    authorizations: authorizations.clone(),
                    authorization_policy: snapshot.authorization_policy(),
                    filters: filters.clone(),
                    success_status: 200,
                    documented: snapshot.documentation_enabled() && metadata.documented,
                    invoker: metadata.invoker.clone(),
                    activator: exposure.activator.clone(),
                    binders: BinderCache::default(),
                });
            }
        }
    }

    descriptors
}
