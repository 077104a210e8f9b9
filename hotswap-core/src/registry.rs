//! PluginRegistry - the table of registered plugins and their lifecycle
//!
//! Every mutating operation holds the registry's write lock for its whole
//! validate-then-mutate sequence, so callers never observe a half-applied
//! registration, conflict check or reload. Lifecycle callbacks run under that
//! lock as well.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use hotswap_plugin_api::{
    HttpMethod, Params, Plugin, PluginDescriptor, PluginError, RegistryHandle, Route,
};
use serde::Serialize;

use crate::error::{LifecycleStage, RegistryError, ResolveError};
use crate::resolver::DependencyGraph;
use crate::routes::{BoundRoute, RouteBinder, plugin_route_path};

/// Enabled state of a registered plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Enabled => f.write_str("enabled"),
            PluginStatus::Disabled => f.write_str("disabled"),
        }
    }
}

/// Route as reported by the administrative surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub method: HttpMethod,
    /// Full path including the `/plugins/<name>` prefix
    pub path: String,
    pub auth_required: bool,
    pub tags: Vec<String>,
    pub description: String,
}

impl RouteSummary {
    fn new(plugin: &str, route: &Route) -> Self {
        Self {
            method: route.method,
            path: plugin_route_path(plugin, &route.path),
            auth_required: route.auth_required,
            tags: route.tags.clone(),
            description: route.description.clone(),
        }
    }
}

/// Serializable snapshot of a registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub status: PluginStatus,
    pub route_bound: bool,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    pub routes: Vec<RouteSummary>,
}

/// A registered plugin with manager-owned state
struct PluginRecord {
    plugin: Arc<dyn Plugin>,
    /// Identity and relationships captured at registration
    descriptor: PluginDescriptor,
    /// Routes captured at registration
    routes: Vec<Route>,
    enabled: bool,
    route_bound: bool,
}

impl PluginRecord {
    fn status(&self) -> PluginStatus {
        if self.enabled {
            PluginStatus::Enabled
        } else {
            PluginStatus::Disabled
        }
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            version: self.descriptor.version.clone(),
            status: self.status(),
            route_bound: self.route_bound,
            dependencies: self.descriptor.dependencies.clone(),
            conflicts: self.descriptor.conflicts.clone(),
            routes: self.route_summaries(),
        }
    }

    fn route_summaries(&self) -> Vec<RouteSummary> {
        self.routes
            .iter()
            .map(|route| RouteSummary::new(&self.descriptor.name, route))
            .collect()
    }
}

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<String, PluginRecord>,
    router: Option<Arc<dyn RouteBinder>>,
}

impl RegistryState {
    /// Check a candidate against registered plugins plus earlier batch members
    fn validate_admission(
        &self,
        candidate: &PluginDescriptor,
        batch: &[&PluginDescriptor],
    ) -> Result<(), RegistryError> {
        let name = &candidate.name;
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidPlugin {
                reason: "plugin name must not be empty".to_string(),
            });
        }
        if self.records.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered { name: name.clone() });
        }

        for dependency in &candidate.dependencies {
            let present = self.records.contains_key(dependency)
                || batch.iter().any(|d| &d.name == dependency);
            if !present {
                return Err(RegistryError::MissingDependency {
                    plugin: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let registered = self
            .records
            .values()
            .map(|r| &r.descriptor)
            .chain(batch.iter().copied());
        for other in registered {
            if candidate.conflicts_with(&other.name) || other.conflicts_with(name) {
                return Err(RegistryError::ConflictDetected {
                    plugin: name.clone(),
                    other: other.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Attach, initialize and insert a validated plugin
    fn admit(
        &mut self,
        plugin: Arc<dyn Plugin>,
        descriptor: PluginDescriptor,
        enabled: bool,
        handle: RegistryHandle,
    ) -> Result<(), RegistryError> {
        let name = descriptor.name.clone();
        plugin.attach(handle);
        plugin.init().map_err(|source| RegistryError::Lifecycle {
            plugin: name.clone(),
            stage: LifecycleStage::Init,
            source,
        })?;

        let routes = plugin.routes();
        self.records.insert(
            name,
            PluginRecord {
                plugin,
                descriptor,
                routes,
                enabled,
                route_bound: false,
            },
        );
        Ok(())
    }

    /// Shut a plugin down and drop its record, whatever shutdown returns
    fn evict(&mut self, name: &str) -> Option<(PluginRecord, Result<(), PluginError>)> {
        let record = self.records.get(name)?;
        let shutdown = record.plugin.shutdown();
        let record = self.records.remove(name)?;
        Some((record, shutdown))
    }

    /// Bind a plugin's routes to the current router, if there is one
    fn bind_routes(&mut self, name: &str) -> Result<(), RegistryError> {
        let Some(router) = self.router.clone() else {
            return Ok(());
        };
        let Some(record) = self.records.get_mut(name) else {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
            });
        };

        let defaults = record.plugin.default_middlewares();
        for route in &record.routes {
            router
                .bind(BoundRoute::for_plugin(name, route, &defaults))
                .map_err(|source| RegistryError::RouteBinding {
                    plugin: name.to_string(),
                    source,
                })?;
        }
        record.route_bound = true;
        tracing::debug!(plugin = %name, routes = record.routes.len(), "Plugin routes bound");
        Ok(())
    }

    /// Dependency graph derived from the current records
    fn graph(&self) -> DependencyGraph {
        self.records
            .values()
            .map(|r| (r.descriptor.name.clone(), r.descriptor.dependencies.clone()))
            .collect()
    }

    /// Names in dependency order, falling back to name order if a cycle exists
    fn dependency_order(&self) -> Vec<String> {
        self.graph()
            .topological_order()
            .unwrap_or_else(|_| self.records.keys().cloned().collect())
    }
}

/// The plugin registry.
///
/// One registry is constructed per host with [`PluginRegistry::new`] and shared
/// by `Arc` with the router setup, the watcher and any administrative surface.
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    this: Weak<PluginRegistry>,
}

impl PluginRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: RwLock::new(RegistryState::default()),
            this: this.clone(),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> RegistryHandle {
        let this: Weak<dyn Any + Send + Sync> = self.this.clone();
        this
    }

    /// Register a single plugin.
    ///
    /// Every declared dependency must already be registered; single
    /// registrations are not reordered. On `init` failure nothing is added.
    /// If route binding fails the plugin stays registered with unbound routes.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let descriptor = plugin.descriptor();
        let name = descriptor.name.clone();

        let mut state = self.write();
        state.validate_admission(&descriptor, &[])?;
        state.admit(plugin, descriptor, true, self.handle())?;
        tracing::info!(plugin = %name, "Plugin registered");

        state.bind_routes(&name)
    }

    /// Register a set of plugins in dependency order, all or nothing.
    ///
    /// Members may depend on each other and on already-registered plugins.
    /// If any `init` fails, members initialized before it are shut down and
    /// removed again.
    pub fn register_plugins(&self, plugins: Vec<Arc<dyn Plugin>>) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        let mut graph = DependencyGraph::new();
        let mut pending: HashMap<String, (Arc<dyn Plugin>, PluginDescriptor)> = HashMap::new();

        for plugin in plugins {
            let descriptor = plugin.descriptor();
            if !seen.insert(descriptor.name.clone()) {
                return Err(RegistryError::DuplicatePlugin {
                    name: descriptor.name,
                });
            }
            graph.add_node(descriptor.name.clone(), descriptor.dependencies.clone());
            pending.insert(descriptor.name.clone(), (plugin, descriptor));
        }

        let order = graph.topological_order()?;
        let ordered: Vec<(Arc<dyn Plugin>, PluginDescriptor)> = order
            .iter()
            .filter_map(|name| pending.remove(name))
            .collect();

        let mut state = self.write();
        for (index, (_, descriptor)) in ordered.iter().enumerate() {
            let earlier: Vec<&PluginDescriptor> = ordered[..index].iter().map(|(_, d)| d).collect();
            state.validate_admission(descriptor, &earlier)?;
        }

        let mut admitted: Vec<String> = Vec::with_capacity(ordered.len());
        for (plugin, descriptor) in ordered {
            let name = descriptor.name.clone();
            if let Err(err) = state.admit(plugin, descriptor, true, self.handle()) {
                for done in admitted.iter().rev() {
                    if let Some((_, Err(e))) = state.evict(done) {
                        tracing::warn!(plugin = %done, error = %e, "Shutdown failed while rolling back batch");
                    }
                }
                tracing::error!(plugin = %name, error = %err, "Batch registration rolled back");
                return Err(err);
            }
            admitted.push(name);
        }

        tracing::info!(plugins = ?admitted, "Plugins registered");
        for name in &admitted {
            state.bind_routes(name)?;
        }
        Ok(())
    }

    /// Shut a plugin down and remove it. Absent names are a no-op.
    ///
    /// Dependents are not checked. The record is removed even when shutdown
    /// fails; the failure is still returned.
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.write();
        match state.evict(name) {
            None => Ok(()),
            Some((_, Ok(()))) => {
                tracing::info!(plugin = %name, "Plugin unregistered");
                Ok(())
            }
            Some((_, Err(source))) => {
                tracing::warn!(plugin = %name, error = %source, "Plugin unregistered after failed shutdown");
                Err(RegistryError::Lifecycle {
                    plugin: name.to_string(),
                    stage: LifecycleStage::Shutdown,
                    source,
                })
            }
        }
    }

    pub fn enable_plugin(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.write();
        let record = state
            .records
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        if record.enabled {
            return Ok(());
        }

        for dependency in &record.descriptor.dependencies {
            let ready = state.records.get(dependency).is_some_and(|r| r.enabled);
            if !ready {
                return Err(RegistryError::DependencyNotEnabled {
                    plugin: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        record
            .plugin
            .on_enable()
            .map_err(|source| RegistryError::Lifecycle {
                plugin: name.to_string(),
                stage: LifecycleStage::Enable,
                source,
            })?;

        let route_bound = match state.records.get_mut(name) {
            Some(record) => {
                record.enabled = true;
                record.route_bound
            }
            None => true,
        };
        tracing::info!(plugin = %name, "Plugin enabled");

        if !route_bound {
            state.bind_routes(name)?;
        }
        Ok(())
    }

    /// Refused while any other enabled plugin depends on `name`
    pub fn disable_plugin(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.write();
        let record = state
            .records
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        if !record.enabled {
            return Ok(());
        }

        let dependent = state
            .records
            .values()
            .find(|r| r.enabled && r.descriptor.name != name && r.descriptor.depends_on(name));
        if let Some(dependent) = dependent {
            return Err(RegistryError::DependencyBlocked {
                plugin: name.to_string(),
                dependent: dependent.descriptor.name.clone(),
            });
        }

        record
            .plugin
            .on_disable()
            .map_err(|source| RegistryError::Lifecycle {
                plugin: name.to_string(),
                stage: LifecycleStage::Disable,
                source,
            })?;

        if let Some(record) = state.records.get_mut(name) {
            record.enabled = false;
        }
        tracing::info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    /// Unregister and register the same instance again, keeping its enabled state
    pub fn reload_plugin(&self, name: &str) -> Result<(), RegistryError> {
        self.reload(name, None)
    }

    /// Replace a plugin with a freshly constructed instance, keeping its enabled state
    pub fn reload_plugin_with(
        &self,
        name: &str,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), RegistryError> {
        self.reload(name, Some(plugin))
    }

    fn reload(&self, name: &str, replacement: Option<Arc<dyn Plugin>>) -> Result<(), RegistryError> {
        let mut state = self.write();
        let current = state
            .records
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })?;
        let enabled = current.enabled;
        let plugin = replacement.unwrap_or_else(|| current.plugin.clone());

        let descriptor = plugin.descriptor();
        if descriptor.name != name {
            return Err(RegistryError::InvalidPlugin {
                reason: format!(
                    "replacement for '{name}' reports name '{}'",
                    descriptor.name
                ),
            });
        }

        // From here on a failure leaves the plugin unregistered.
        if let Some((_, Err(source))) = state.evict(name) {
            tracing::warn!(plugin = %name, error = %source, "Reload aborted, shutdown failed");
            return Err(RegistryError::Lifecycle {
                plugin: name.to_string(),
                stage: LifecycleStage::Shutdown,
                source,
            });
        }

        let admitted = match state.validate_admission(&descriptor, &[]) {
            Ok(()) => state.admit(plugin, descriptor, enabled, self.handle()),
            Err(err) => Err(err),
        };
        if let Err(err) = admitted {
            tracing::warn!(plugin = %name, error = %err, "Reload failed, plugin is no longer registered");
            return Err(err);
        }
        tracing::info!(plugin = %name, enabled, "Plugin reloaded");

        // Disabled plugins get their routes bound when re-enabled
        if enabled {
            state.bind_routes(name)?;
        }
        Ok(())
    }

    /// Run a plugin. The registry lock is released before the plugin executes.
    pub fn execute_plugin(
        &self,
        name: &str,
        params: &Params,
    ) -> Result<serde_json::Value, RegistryError> {
        let plugin = {
            let state = self.read();
            let record = state
                .records
                .get(name)
                .ok_or_else(|| RegistryError::NotFound {
                    name: name.to_string(),
                })?;
            if !record.enabled {
                return Err(RegistryError::Disabled {
                    name: name.to_string(),
                });
            }
            record.plugin.clone()
        };

        plugin
            .execute(params)
            .map_err(|source| RegistryError::Execution {
                plugin: name.to_string(),
                source,
            })
    }

    /// `None` when no plugin by that name is registered
    pub fn plugin_status(&self, name: &str) -> Option<PluginStatus> {
        self.read().records.get(name).map(PluginRecord::status)
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read().records.get(name).map(|r| r.plugin.clone())
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.read().records.get(name).map(PluginRecord::info)
    }

    /// Info for every registered plugin, sorted by name
    pub fn all_plugins_info(&self) -> Vec<PluginInfo> {
        self.read().records.values().map(PluginRecord::info).collect()
    }

    /// Registered plugin names, sorted
    pub fn list_plugins(&self) -> Vec<String> {
        self.read().records.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Plugin name to declared dependency names, recomputed on each call
    pub fn dependency_graph(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.read().graph().snapshot()
    }

    /// Declared routes of every plugin, keyed by plugin name
    pub fn all_routes(&self) -> BTreeMap<String, Vec<RouteSummary>> {
        self.read()
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.route_summaries()))
            .collect()
    }

    /// Attach or detach the router future bindings target.
    ///
    /// Routes of already-registered plugins are not bound retroactively; call
    /// [`PluginRegistry::register_all_routes`] for that.
    pub fn set_router(&self, router: Option<Arc<dyn RouteBinder>>) {
        let mut state = self.write();
        if router.is_none() {
            for record in state.records.values_mut() {
                record.route_bound = false;
            }
        }
        state.router = router;
    }

    /// Bind the routes of every plugin whose routes are not bound yet
    pub fn register_all_routes(&self) -> Result<(), RegistryError> {
        let mut state = self.write();
        if state.router.is_none() {
            return Err(RegistryError::RouterNotSet);
        }

        for name in state.dependency_order() {
            let unbound = state.records.get(&name).is_some_and(|r| !r.route_bound);
            if unbound {
                state.bind_routes(&name)?;
            }
        }
        Ok(())
    }

    /// Health check: one error per missing dependency, conflicting pair or cycle
    pub fn check_dependencies(&self) -> Vec<RegistryError> {
        let state = self.read();
        let mut problems = Vec::new();

        for record in state.records.values() {
            for dependency in &record.descriptor.dependencies {
                if !state.records.contains_key(dependency) {
                    problems.push(RegistryError::MissingDependency {
                        plugin: record.descriptor.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let records: Vec<&PluginRecord> = state.records.values().collect();
        for (index, a) in records.iter().enumerate() {
            for b in &records[index + 1..] {
                if a.descriptor.conflicts_with(&b.descriptor.name)
                    || b.descriptor.conflicts_with(&a.descriptor.name)
                {
                    problems.push(RegistryError::ConflictDetected {
                        plugin: a.descriptor.name.clone(),
                        other: b.descriptor.name.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = state.graph().find_cycle() {
            problems.push(ResolveError::CycleDetected { cycle }.into());
        }

        problems
    }

    /// Unregister everything, dependents first. Shutdown failures are logged.
    pub fn shutdown_all(&self) {
        let mut state = self.write();
        let order = state.dependency_order();
        for name in order.iter().rev() {
            match state.evict(name) {
                Some((_, Err(e))) => {
                    tracing::warn!(plugin = %name, error = %e, "Plugin shutdown returned error");
                }
                Some((_, Ok(()))) => {
                    tracing::debug!(plugin = %name, "Plugin shut down");
                }
                None => {}
            }
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("PluginRegistry")
            .field("plugins", &state.records.keys().collect::<Vec<_>>())
            .field("router", &state.router.is_some())
            .finish()
    }
}
