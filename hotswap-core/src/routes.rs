//! Router boundary for plugin routes, plus an in-memory route table

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hotswap_plugin_api::{HttpMethod, Middleware, Route, RouteHandler, RouteRequest, RouteResponse};

use crate::error::RouterError;

/// Prefix every plugin route is mounted under
pub const PLUGIN_ROUTE_PREFIX: &str = "/plugins";

/// Full path of a plugin route: `/plugins/<plugin><path>`
pub fn plugin_route_path(plugin: &str, path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        format!("{PLUGIN_ROUTE_PREFIX}/{plugin}")
    } else if path.starts_with('/') {
        format!("{PLUGIN_ROUTE_PREFIX}/{plugin}{path}")
    } else {
        format!("{PLUGIN_ROUTE_PREFIX}/{plugin}/{path}")
    }
}

/// A plugin route resolved against its plugin, ready to be served
#[derive(Clone)]
pub struct BoundRoute {
    /// Name of the plugin that owns this route
    pub plugin: String,
    pub method: HttpMethod,
    /// Full path including the `/plugins/<plugin>` prefix
    pub path: String,
    pub handler: RouteHandler,
    /// Plugin default middlewares followed by the route's own
    pub middlewares: Vec<Middleware>,
    pub auth_required: bool,
    pub tags: Vec<String>,
}

impl BoundRoute {
    pub fn for_plugin(plugin: &str, route: &Route, defaults: &[Middleware]) -> Self {
        Self {
            plugin: plugin.to_string(),
            method: route.method,
            path: plugin_route_path(plugin, &route.path),
            handler: route.handler.clone(),
            middlewares: defaults
                .iter()
                .chain(route.middlewares.iter())
                .cloned()
                .collect(),
            auth_required: route.auth_required,
            tags: route.tags.clone(),
        }
    }
}

impl std::fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundRoute")
            .field("plugin", &self.plugin)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .field("auth_required", &self.auth_required)
            .finish()
    }
}

/// The capability a host HTTP layer supplies to the registry: bind one route
pub trait RouteBinder: Send + Sync {
    fn bind(&self, route: BoundRoute) -> Result<(), RouterError>;
}

/// Simple path matcher supporting :param patterns
struct PathMatcher {
    segments: Vec<PathSegment>,
}

enum PathSegment {
    Literal(String),
    Param(String),
}

impl PathMatcher {
    fn parse(path: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for part in path.split('/').filter(|s| !s.is_empty()) {
            match part.strip_prefix(':') {
                Some("") => return Err("empty path parameter name".to_string()),
                Some(name) => {
                    let duplicate = segments
                        .iter()
                        .any(|s| matches!(s, PathSegment::Param(p) if p == name));
                    if duplicate {
                        return Err(format!("duplicate path parameter ':{name}'"));
                    }
                    segments.push(PathSegment::Param(name.to_string()));
                }
                None => segments.push(PathSegment::Literal(part.to_string())),
            }
        }
        Ok(Self { segments })
    }

    fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if path_parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();

        for (segment, part) in self.segments.iter().zip(path_parts.iter()) {
            match segment {
                PathSegment::Literal(expected) => {
                    if expected != *part {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }

        Some(params)
    }
}

struct TableEntry {
    route: BoundRoute,
    matcher: PathMatcher,
}

/// A route matched by [`RouteTable::match_route`]
pub struct RouteMatch {
    pub route: BoundRoute,
    /// Path parameters extracted from the request path
    pub params: HashMap<String, String>,
}

/// In-memory [`RouteBinder`] that can also dispatch requests.
///
/// Binding a method and path that is already present replaces the previous
/// entry, so reloaded plugins pick up their new handlers.
#[derive(Default)]
pub struct RouteTable {
    entries: RwLock<Vec<TableEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Method and full path of every route owned by `plugin`
    pub fn routes_for(&self, plugin: &str) -> Vec<(HttpMethod, String)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.route.plugin == plugin)
            .map(|e| (e.route.method, e.route.path.clone()))
            .collect()
    }

    /// Find a route matching the given method and path
    pub fn match_route(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().find_map(|entry| {
            if entry.route.method != method {
                return None;
            }
            entry.matcher.match_path(path).map(|params| RouteMatch {
                route: entry.route.clone(),
                params,
            })
        })
    }

    /// Serve a request: middlewares in order, then the handler.
    ///
    /// Returns `None` when no route matches.
    pub fn dispatch(
        &self,
        method: HttpMethod,
        path: &str,
        mut request: RouteRequest,
    ) -> Option<RouteResponse> {
        let RouteMatch { route, params } = self.match_route(method, path)?;
        request.params.extend(params);

        for middleware in &route.middlewares {
            if let Some(response) = middleware(&request) {
                tracing::debug!(plugin = %route.plugin, path = %route.path, "Middleware short-circuited request");
                return Some(response);
            }
        }

        Some((route.handler)(&request))
    }
}

impl RouteBinder for RouteTable {
    fn bind(&self, route: BoundRoute) -> Result<(), RouterError> {
        let matcher =
            PathMatcher::parse(&route.path).map_err(|reason| RouterError::UnsupportedRoute {
                method: route.method,
                path: route.path.clone(),
                reason,
            })?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let existing = entries
            .iter_mut()
            .find(|e| e.route.method == route.method && e.route.path == route.path);

        match existing {
            Some(entry) => {
                tracing::debug!(plugin = %route.plugin, method = %route.method, path = %route.path, "Replacing bound route");
                entry.route = route;
                entry.matcher = matcher;
            }
            None => {
                tracing::debug!(plugin = %route.plugin, method = %route.method, path = %route.path, "Binding route");
                entries.push(TableEntry { route, matcher });
            }
        }

        Ok(())
    }
}
