//! Configuration loading
//!
//! Layers, lowest precedence first: built-in defaults, the user config file,
//! an explicit config file, then `HOTSWAP_*` environment variables.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default quiet period before a file change is dispatched
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;

pub const ENV_PLUGINS_DIR: &str = "HOTSWAP_PLUGINS_DIR";
pub const ENV_WATCHER_ENABLED: &str = "HOTSWAP_WATCHER_ENABLED";
pub const ENV_HOT_RELOAD: &str = "HOTSWAP_HOT_RELOAD";
pub const ENV_DEBOUNCE_MS: &str = "HOTSWAP_DEBOUNCE_MS";

/// Config directory: `$XDG_CONFIG_HOME/hotswap`, else `~/.config/hotswap`.
///
/// XDG layout is used on every platform rather than platform-native paths.
pub fn config_dir() -> PathBuf {
    resolve_config_dir(std::env::var_os("XDG_CONFIG_HOME"), dirs::home_dir())
}

/// Default directory watched for plugins: `<config_dir>/plugins`
pub fn plugins_dir() -> PathBuf {
    config_dir().join("plugins")
}

fn resolve_config_dir(xdg_config_home: Option<OsString>, home: Option<PathBuf>) -> PathBuf {
    match (xdg_config_home.filter(|dir| !dir.is_empty()), home) {
        (Some(xdg), _) => PathBuf::from(xdg).join("hotswap"),
        (None, Some(home)) => home.join(".config/hotswap"),
        (None, None) => PathBuf::from(".config/hotswap"),
    }
}

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHotswapConfig {
    #[serde(default)]
    pub plugins: RawPluginsConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPluginsConfig {
    /// Directory scanned and watched for plugins
    pub dir: Option<PathBuf>,
    pub watcher_enabled: Option<bool>,
    pub hot_reload: Option<bool>,
    pub debounce_ms: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HotswapConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginsConfig {
    pub dir: PathBuf,
    /// Start the directory watcher when serving
    pub watcher_enabled: bool,
    /// Apply file changes to the registry; when off changes are only logged
    pub hot_reload: bool,
    pub debounce_ms: u64,
}

impl PluginsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: plugins_dir(),
            watcher_enabled: true,
            hot_reload: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user file, explicit file, environment)
    pub fn load(explicit: Option<&Path>) -> Result<HotswapConfig, ConfigError> {
        let mut raw = RawHotswapConfig::default();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Explicit config
        if let Some(path) = explicit {
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        // Layer 3: Environment
        raw = Self::apply_env(raw, |key| std::env::var(key).ok());

        Ok(Self::finalize(raw))
    }

    /// Load a single file with defaults applied, ignoring other layers
    pub fn load_from(path: &Path) -> Result<HotswapConfig, ConfigError> {
        Ok(Self::finalize(Self::read_raw(path)?))
    }

    /// `<config dir>/config.toml`
    pub fn user_config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    fn read_raw(path: &Path) -> Result<RawHotswapConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawHotswapConfig, overlay: RawHotswapConfig) -> RawHotswapConfig {
        RawHotswapConfig {
            plugins: RawPluginsConfig {
                dir: overlay.plugins.dir.or(base.plugins.dir),
                watcher_enabled: overlay
                    .plugins
                    .watcher_enabled
                    .or(base.plugins.watcher_enabled),
                hot_reload: overlay.plugins.hot_reload.or(base.plugins.hot_reload),
                debounce_ms: overlay.plugins.debounce_ms.or(base.plugins.debounce_ms),
            },
        }
    }

    /// Overlay `HOTSWAP_*` variables. Unparseable values are ignored.
    fn apply_env<F>(mut raw: RawHotswapConfig, lookup: F) -> RawHotswapConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_PLUGINS_DIR).filter(|d| !d.trim().is_empty()) {
            raw.plugins.dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup(ENV_WATCHER_ENABLED) {
            raw.plugins.watcher_enabled = parse_bool(ENV_WATCHER_ENABLED, &value)
                .or(raw.plugins.watcher_enabled);
        }
        if let Some(value) = lookup(ENV_HOT_RELOAD) {
            raw.plugins.hot_reload =
                parse_bool(ENV_HOT_RELOAD, &value).or(raw.plugins.hot_reload);
        }
        if let Some(value) = lookup(ENV_DEBOUNCE_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => raw.plugins.debounce_ms = Some(ms),
                Err(e) => {
                    tracing::warn!(var = ENV_DEBOUNCE_MS, value = %value, error = %e, "Ignoring invalid environment value");
                }
            }
        }
        raw
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawHotswapConfig) -> HotswapConfig {
        let defaults = PluginsConfig::default();
        HotswapConfig {
            plugins: PluginsConfig {
                dir: raw.plugins.dir.unwrap_or(defaults.dir),
                watcher_enabled: raw
                    .plugins
                    .watcher_enabled
                    .unwrap_or(defaults.watcher_enabled),
                hot_reload: raw.plugins.hot_reload.unwrap_or(defaults.hot_reload),
                debounce_ms: raw.plugins.debounce_ms.unwrap_or(defaults.debounce_ms),
            },
        }
    }
}

fn parse_bool(var: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(var = %var, value = %value, "Ignoring invalid environment value");
            None
        }
    }
}
