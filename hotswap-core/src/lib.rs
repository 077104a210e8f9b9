//! hotswap-core: runtime plugin management
//!
//! This crate provides the pieces a host needs to run plugins that can be
//! added, replaced and removed while it keeps serving:
//!
//! - **Dependency resolution** - [`DependencyGraph`] orders plugins so dependencies come first
//! - **Registry** - [`PluginRegistry`] owns plugin lifecycle, enable state and route binding
//! - **Dynamic loading** - [`DynamicLoader`] opens compiled plugin modules
//! - **Manifests** - [`load_plugin_manifest`] reads `<name>.toml` / `<name>.json` sidecars
//! - **Hot reload** - [`PluginWatcher`] turns plugin directory changes into registry calls
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotswap_core::{DynamicLoader, PluginRegistry, PluginWatcher, RouteTable, WatcherOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = PluginRegistry::new();
//!     registry.set_router(Some(Arc::new(RouteTable::new())));
//!
//!     let loader = Arc::new(DynamicLoader::new());
//!     let watcher = PluginWatcher::new("./plugins", registry.clone(), loader, WatcherOptions::default());
//!     watcher.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     watcher.shutdown().await;
//!     registry.shutdown_all();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! plugin dir ──notify──▶ PluginWatcher ──debounce──▶ PluginManager
//!                            │                          │
//!                       DynamicLoader            PluginRegistry ──▶ RouteBinder
//!                      (module handles)       (records, lifecycle)  (RouteTable)
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod routes;
pub mod watcher;

// Re-export key types for convenience
pub use config::{ConfigLoader, HotswapConfig, PluginsConfig, config_dir, plugins_dir};
pub use discovery::{LoadReport, PluginCandidate, discover, load_directory, load_order};
pub use error::{
    ConfigError, HotswapError, LifecycleStage, LoadError, ManifestError, RegistryError,
    ResolveError, Result, RouterError, WatcherError,
};
pub use loader::{DynamicLoader, find_library};
pub use manifest::{find_manifest, load_plugin_manifest};
pub use registry::{PluginInfo, PluginRegistry, PluginStatus, RouteSummary};
pub use resolver::DependencyGraph;
pub use routes::{BoundRoute, RouteBinder, RouteTable, plugin_route_path};
pub use watcher::{PluginManager, PluginWatcher, WatcherOptions};
