//! Error types for the plugin manager

use std::fmt;
use std::path::PathBuf;

use hotswap_plugin_api::{HttpMethod, PluginError};
use thiserror::Error;

/// Dependency resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No valid order exists; `cycle` lists the nodes of one cycle in edge order
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    CycleDetected { cycle: Vec<String> },
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Lifecycle callback that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Init,
    Shutdown,
    Enable,
    Disable,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            LifecycleStage::Init => "init",
            LifecycleStage::Shutdown => "shutdown",
            LifecycleStage::Enable => "enable",
            LifecycleStage::Disable => "disable",
        };
        f.write_str(stage)
    }
}

/// Errors returned by the router a registry binds routes into
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Route {method} {path} rejected: {reason}")]
    UnsupportedRoute {
        method: HttpMethod,
        path: String,
        reason: String,
    },
}

/// Plugin registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid plugin: {reason}")]
    InvalidPlugin { reason: String },

    #[error("Plugin '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("Plugin '{name}' appears more than once in the batch")]
    DuplicatePlugin { name: String },

    #[error("Plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' conflicts with '{other}'")]
    ConflictDetected { plugin: String, other: String },

    #[error(transparent)]
    CycleDetected(#[from] ResolveError),

    #[error("Cannot disable '{plugin}': enabled plugin '{dependent}' depends on it")]
    DependencyBlocked { plugin: String, dependent: String },

    #[error("Cannot enable '{plugin}': dependency '{dependency}' is not enabled")]
    DependencyNotEnabled { plugin: String, dependency: String },

    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    #[error("Plugin '{name}' is disabled")]
    Disabled { name: String },

    #[error("Plugin '{plugin}' failed during {stage}: {source}")]
    Lifecycle {
        plugin: String,
        stage: LifecycleStage,
        source: PluginError,
    },

    #[error("Plugin '{plugin}' execution failed: {source}")]
    Execution { plugin: String, source: PluginError },

    #[error("Failed to bind routes for plugin '{plugin}': {source}")]
    RouteBinding { plugin: String, source: RouterError },

    #[error("No router attached")]
    RouterNotSet,
}

/// Manifest reading errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Malformed manifest {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Dynamic loading errors
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Plugin library not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to open plugin library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("Plugin library {path} does not export '{symbol}': {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        source: libloading::Error,
    },

    /// API version mismatch between the host and the plugin
    #[error("API version mismatch: host expects {expected}, plugin has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    #[error("Invalid plugin in {path}: {reason}")]
    InvalidPlugin { path: PathBuf, reason: String },
}

/// Plugin directory watcher errors
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Plugin directory not found: {path}")]
    DirNotFound { path: PathBuf },

    #[error("File watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level error type for hotswap-core
#[derive(Error, Debug)]
pub enum HotswapError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HotswapError>;
