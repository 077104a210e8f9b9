//! Dynamic loading of compiled plugin modules
//!
//! A module is a shared library exporting the two entry points generated by
//! [`hotswap_plugin_api::export_plugin!`]. Loading a name that already has a
//! handle removes the old handle first, so a failed reload leaves the plugin
//! absent rather than half-replaced.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hotswap_plugin_api::{API_VERSION, Plugin};
use libloading::{Library, Symbol};

use crate::error::LoadError;

/// Exported symbol returning the plugin API version
pub const API_VERSION_SYMBOL: &[u8] = b"_hotswap_plugin_api_version";

/// Exported symbol constructing a plugin instance
pub const CREATE_SYMBOL: &[u8] = b"_hotswap_plugin_create";

/// Dynamic library extensions for the current platform
pub fn library_extensions() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else if cfg!(target_os = "windows") {
        &["dll"]
    } else {
        &["so"]
    }
}

/// Whether `path` has a dynamic library extension
pub fn is_library_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| library_extensions().contains(&ext))
}

/// Plugin name for a library file: the stem without a `lib` prefix
pub fn plugin_name_from_library(path: &Path) -> Option<String> {
    if !is_library_file(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    (!name.is_empty()).then(|| name.to_string())
}

/// Find the compiled module for `name` in `dir`.
///
/// Looks for `<name>.<ext>` then `lib<name>.<ext>` for each platform extension.
pub fn find_library(dir: &Path, name: &str) -> Option<PathBuf> {
    for ext in library_extensions() {
        let lib_path = dir.join(format!("{name}.{ext}"));
        if lib_path.exists() {
            return Some(lib_path);
        }

        let lib_path = dir.join(format!("lib{name}.{ext}"));
        if lib_path.exists() {
            return Some(lib_path);
        }
    }
    None
}

/// An open module handle
struct LoadedModule {
    path: PathBuf,
    library: Library,
}

/// Opens plugin modules and owns their handles.
///
/// Removed handles are retired instead of closed. Plugin instances created
/// from a module may still be referenced (by an in-flight execution or a
/// bound route handler) after the handle is removed, and closing the library
/// would unmap their code.
#[derive(Default)]
pub struct DynamicLoader {
    modules: Mutex<HashMap<String, LoadedModule>>,
    retired: Mutex<Vec<Library>>,
}

impl DynamicLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn modules(&self) -> MutexGuard<'_, HashMap<String, LoadedModule>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, library: Library) {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library);
    }

    /// Open the module at `path` and construct the plugin it exports.
    ///
    /// Any existing handle for `name` is removed before the new module is
    /// opened. The constructed plugin must report `name` as its name.
    pub fn load_plugin(&self, path: &Path, name: &str) -> Result<Arc<dyn Plugin>, LoadError> {
        let mut modules = self.modules();
        if let Some(old) = modules.remove(name) {
            tracing::debug!(plugin = %name, path = %old.path.display(), "Removed previous module handle");
            self.retire(old.library);
        }

        if !path.exists() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: Opening a library runs its initializers. Plugin modules in the
        // plugin directory are trusted to follow the export_plugin! contract.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        match instantiate(&library, path, name) {
            Ok(plugin) => {
                modules.insert(
                    name.to_string(),
                    LoadedModule {
                        path: path.to_path_buf(),
                        library,
                    },
                );
                tracing::info!(plugin = %name, path = %path.display(), "Plugin module loaded");
                Ok(plugin)
            }
            Err(err) => {
                self.retire(library);
                Err(err)
            }
        }
    }

    /// Drop the handle for `name`. Returns whether one was present.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let Some(module) = self.modules().remove(name) else {
            return false;
        };
        tracing::debug!(plugin = %name, path = %module.path.display(), "Plugin module unloaded");
        self.retire(module.library);
        true
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules().contains_key(name)
    }

    /// Names with an open handle, sorted
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules().keys().cloned().collect();
        names.sort();
        names
    }

    /// Path the handle for `name` was opened from
    pub fn library_path(&self, name: &str) -> Option<PathBuf> {
        self.modules().get(name).map(|m| m.path.clone())
    }

    #[cfg(test)]
    fn insert_handle(&self, name: &str, path: &Path, library: Library) {
        self.modules().insert(
            name.to_string(),
            LoadedModule {
                path: path.to_path_buf(),
                library,
            },
        );
    }
}

impl fmt::Debug for DynamicLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLoader")
            .field("loaded", &self.loaded_plugins())
            .finish()
    }
}

/// Resolve the entry points of an open library and construct its plugin
fn instantiate(library: &Library, path: &Path, name: &str) -> Result<Arc<dyn Plugin>, LoadError> {
    let missing = |symbol: &[u8], source: libloading::Error| LoadError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: String::from_utf8_lossy(symbol).into_owned(),
        source,
    };

    // SAFETY: The symbol is generated by export_plugin! with this signature.
    let api_version_fn: Symbol<extern "C" fn() -> u32> =
        unsafe { library.get(API_VERSION_SYMBOL) }.map_err(|e| missing(API_VERSION_SYMBOL, e))?;

    let found = api_version_fn();
    if found != API_VERSION {
        return Err(LoadError::ApiVersionMismatch {
            expected: API_VERSION,
            found,
        });
    }

    // SAFETY: Same as above; the API version check guarantees the trait layout matches.
    let create_fn: Symbol<extern "C" fn() -> *mut dyn Plugin> =
        unsafe { library.get(CREATE_SYMBOL) }.map_err(|e| missing(CREATE_SYMBOL, e))?;

    let raw = create_fn();
    if raw.is_null() {
        return Err(LoadError::InvalidPlugin {
            path: path.to_path_buf(),
            reason: "constructor returned a null instance".to_string(),
        });
    }

    // SAFETY: The pointer comes from Box::into_raw in export_plugin!.
    let plugin: Box<dyn Plugin> = unsafe { Box::from_raw(raw) };

    let reported = plugin.name();
    if reported.trim().is_empty() {
        return Err(LoadError::InvalidPlugin {
            path: path.to_path_buf(),
            reason: "plugin reports an empty name".to_string(),
        });
    }
    if reported != name {
        return Err(LoadError::InvalidPlugin {
            path: path.to_path_buf(),
            reason: format!("expected plugin '{name}', module provides '{reported}'"),
        });
    }

    Ok(Arc::from(plugin))
}
