//! Sidecar manifest reading
//!
//! A manifest sits next to a plugin module as `<name>.toml` or `<name>.json`
//! and describes the plugin without loading it.

use std::path::{Path, PathBuf};

use hotswap_plugin_api::PluginManifest;

use crate::error::ManifestError;

/// Manifest file extensions, in lookup order
pub const MANIFEST_EXTENSIONS: &[&str] = &["toml", "json"];

/// Whether `path` has a manifest extension
pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

/// Locate the manifest for `name` in `dir`
pub fn find_manifest(dir: &Path, name: &str) -> Option<PathBuf> {
    MANIFEST_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|path| path.is_file())
}

/// Read and parse a manifest. `.json` files are JSON, anything else is TOML.
pub fn load_plugin_manifest(path: &Path) -> Result<PluginManifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let malformed = |reason: String| ManifestError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let manifest: PluginManifest = if is_json {
        serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?
    } else {
        toml::from_str(&content).map_err(|e| malformed(e.to_string()))?
    };

    if manifest.name.trim().is_empty() {
        return Err(malformed("manifest has no plugin name".to_string()));
    }

    tracing::debug!(plugin = %manifest.name, path = %path.display(), "Manifest loaded");
    Ok(manifest)
}
