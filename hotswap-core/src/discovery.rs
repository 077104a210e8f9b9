//! Plugin directory discovery and bulk loading

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hotswap_plugin_api::{API_VERSION, PluginManifest};

use crate::error::{HotswapError, ResolveError};
use crate::loader::{DynamicLoader, plugin_name_from_library};
use crate::manifest::{is_manifest_file, load_plugin_manifest};
use crate::registry::PluginRegistry;
use crate::resolver::DependencyGraph;

/// A plugin found in a directory: its compiled module and/or its manifest
#[derive(Debug, Clone, PartialEq)]
pub struct PluginCandidate {
    pub name: String,
    pub library: Option<PathBuf>,
    pub manifest: Option<PluginManifest>,
}

impl PluginCandidate {
    fn new(name: String) -> Self {
        Self {
            name,
            library: None,
            manifest: None,
        }
    }

    /// Dependencies declared by the manifest, if any
    pub fn dependencies(&self) -> &[String] {
        self.manifest
            .as_ref()
            .map(|m| m.dependencies.as_slice())
            .unwrap_or(&[])
    }
}

/// Scan `dir` for plugin modules and manifests, sorted by name.
///
/// A missing directory yields no candidates. Candidates with a malformed
/// manifest are logged and skipped.
pub fn discover(dir: &Path) -> std::io::Result<Vec<PluginCandidate>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Plugin directory does not exist");
        return Ok(Vec::new());
    }

    let mut found: BTreeMap<String, PluginCandidate> = BTreeMap::new();
    let mut broken: Vec<String> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        if let Some(name) = plugin_name_from_library(&path) {
            found
                .entry(name.clone())
                .or_insert_with(|| PluginCandidate::new(name))
                .library = Some(path);
        } else if is_manifest_file(&path) {
            match load_plugin_manifest(&path) {
                Ok(manifest) => {
                    let name = manifest.name.clone();
                    found
                        .entry(name.clone())
                        .or_insert_with(|| PluginCandidate::new(name))
                        .manifest = Some(manifest);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping plugin with malformed manifest");
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        broken.push(stem.to_string());
                    }
                }
            }
        }
    }

    for name in broken {
        found.remove(&name);
    }
    Ok(found.into_values().collect())
}

/// Order candidates so that manifest dependencies come first
pub fn load_order(candidates: &[PluginCandidate]) -> Result<Vec<&PluginCandidate>, ResolveError> {
    let graph: DependencyGraph = candidates
        .iter()
        .map(|c| (c.name.clone(), c.dependencies().to_vec()))
        .collect();

    let order = graph.topological_order()?;
    Ok(order
        .iter()
        .filter_map(|name| candidates.iter().find(|c| &c.name == name))
        .collect())
}

/// Outcome of [`load_directory`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Plugins registered, in registration order
    pub loaded: Vec<String>,
    /// Plugins that failed to load or register, with the reason
    pub failed: Vec<(String, String)>,
}

/// Load and register every compiled module in `dir` in dependency order.
///
/// Individual failures are logged and collected; only an unreadable directory
/// or a dependency cycle among manifests aborts the whole load.
pub fn load_directory(
    registry: &PluginRegistry,
    loader: &DynamicLoader,
    dir: &Path,
) -> Result<LoadReport, HotswapError> {
    let candidates = discover(dir)?;
    let mut report = LoadReport::default();

    for candidate in load_order(&candidates)? {
        let Some(library) = &candidate.library else {
            tracing::debug!(plugin = %candidate.name, "Manifest without module, skipping");
            continue;
        };
        if let Some(manifest) = &candidate.manifest
            && !manifest.supports_runtime(API_VERSION)
        {
            tracing::warn!(plugin = %candidate.name, "Plugin requires a newer runtime, skipping");
            report
                .failed
                .push((candidate.name.clone(), "requires a newer runtime".to_string()));
            continue;
        }

        let outcome = loader
            .load_plugin(library, &candidate.name)
            .map_err(HotswapError::from)
            .and_then(|plugin| registry.register(plugin).map_err(HotswapError::from));

        match outcome {
            Ok(()) => report.loaded.push(candidate.name.clone()),
            Err(e) => {
                tracing::error!(plugin = %candidate.name, error = %e, "Failed to load plugin");
                if !registry.contains(&candidate.name) {
                    loader.unload_plugin(&candidate.name);
                }
                report.failed.push((candidate.name.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}
