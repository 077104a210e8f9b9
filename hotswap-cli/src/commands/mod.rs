pub mod check;
pub mod graph;
pub mod list;
pub mod manifest;
pub mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use hotswap_core::{ConfigLoader, DynamicLoader, LoadReport, PluginRegistry, load_directory};

/// Plugin directory from `--dir`, falling back to configuration
pub fn resolve_dir(dir: Option<PathBuf>, config: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(ConfigLoader::load(config)?.plugins.dir),
    }
}

/// Registry with every module in `dir` loaded
pub struct LoadedHost {
    pub registry: Arc<PluginRegistry>,
    pub loader: Arc<DynamicLoader>,
    pub report: LoadReport,
}

pub fn load_host(dir: &Path) -> Result<LoadedHost> {
    let registry = PluginRegistry::new();
    let loader = Arc::new(DynamicLoader::new());
    let report = load_directory(&registry, &loader, dir)
        .with_context(|| format!("Failed to load plugins from {}", dir.display()))?;

    Ok(LoadedHost {
        registry,
        loader,
        report,
    })
}

/// Print load failures to stderr
pub fn print_failures(report: &LoadReport) {
    for (name, reason) in &report.failed {
        eprintln!("✗ {name}: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_dir_prefers_flag() {
        let dir = resolve_dir(Some(PathBuf::from("/flag/plugins")), None).unwrap();
        assert_eq!(dir, PathBuf::from("/flag/plugins"));
    }

    #[test]
    fn test_load_host_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        let host = load_host(dir.path()).unwrap();
        assert!(host.registry.is_empty());
        assert!(host.report.loaded.is_empty());
        assert!(host.loader.loaded_plugins().is_empty());
    }
}
