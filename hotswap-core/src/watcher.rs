//! Plugin directory watcher with per-file debouncing
//!
//! File events are collected per path; each event pushes that path's deadline
//! out by the debounce interval. When a deadline passes the path is dispatched
//! once, and whether it was created, modified or removed is decided by looking
//! at the filesystem at that moment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hotswap_plugin_api::{API_VERSION, Plugin};
use notify::{RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DEBOUNCE_MS, PluginsConfig};
use crate::error::{RegistryError, WatcherError};
use crate::loader::{DynamicLoader, find_library, plugin_name_from_library};
use crate::manifest::{find_manifest, is_manifest_file, load_plugin_manifest};
use crate::registry::PluginRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry operations the watcher drives
pub trait PluginManager: Send + Sync {
    fn is_registered(&self, name: &str) -> bool;
    fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError>;
    fn unregister(&self, name: &str) -> Result<(), RegistryError>;
    fn reload_plugin(&self, name: &str) -> Result<(), RegistryError>;
    fn reload_plugin_with(&self, name: &str, plugin: Arc<dyn Plugin>)
    -> Result<(), RegistryError>;
}

impl PluginManager for PluginRegistry {
    fn is_registered(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        PluginRegistry::register(self, plugin)
    }

    fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        PluginRegistry::unregister(self, name)
    }

    fn reload_plugin(&self, name: &str) -> Result<(), RegistryError> {
        PluginRegistry::reload_plugin(self, name)
    }

    fn reload_plugin_with(
        &self,
        name: &str,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), RegistryError> {
        PluginRegistry::reload_plugin_with(self, name, plugin)
    }
}

/// What a recognized plugin file is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFileKind {
    Source,
    Library,
    Manifest,
}

/// Hidden files and editor swap/backup files
pub fn is_temp_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };

    if file_name.starts_with('.') || file_name.ends_with('~') {
        return true;
    }
    if file_name.len() > 1 && file_name.starts_with('#') && file_name.ends_with('#') {
        return true;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "swp" | "swo" | "swx" | "tmp"))
}

/// Plugin name and kind for a watched file, or `None` if it is not a plugin file
pub fn classify(path: &Path) -> Option<(String, PluginFileKind)> {
    if is_temp_file(path) {
        return None;
    }
    if let Some(name) = plugin_name_from_library(path) {
        return Some((name, PluginFileKind::Library));
    }

    let kind = if path.extension().is_some_and(|ext| ext == "rs") {
        PluginFileKind::Source
    } else if is_manifest_file(path) {
        PluginFileKind::Manifest
    } else {
        return None;
    };

    let name = path.file_stem()?.to_str()?;
    (!name.is_empty()).then(|| (name.to_string(), kind))
}

pub fn plugin_name_from_path(path: &Path) -> Option<String> {
    classify(path).map(|(name, _)| name)
}

/// Watcher tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Quiet period per path before a change is dispatched
    pub debounce: Duration,
    /// Whether dispatched changes mutate the registry
    pub hot_reload: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            hot_reload: true,
        }
    }
}

impl From<&PluginsConfig> for WatcherOptions {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            debounce: config.debounce(),
            hot_reload: config.hot_reload,
        }
    }
}

struct WatcherInner {
    dir: PathBuf,
    manager: Arc<dyn PluginManager>,
    loader: Arc<DynamicLoader>,
    hot_reload: AtomicBool,
    debounce: Duration,
}

struct Running {
    watcher: RecommendedWatcher,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Watches one plugin directory and applies changes to a [`PluginManager`]
pub struct PluginWatcher {
    inner: Arc<WatcherInner>,
    running: Mutex<Option<Running>>,
}

impl PluginWatcher {
    pub fn new(
        dir: impl Into<PathBuf>,
        manager: Arc<dyn PluginManager>,
        loader: Arc<DynamicLoader>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                dir: dir.into(),
                manager,
                loader,
                hot_reload: AtomicBool::new(options.hot_reload),
                debounce: options.debounce,
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Start watching. Must be called from within a tokio runtime.
    ///
    /// Every plugin file already in the directory is queued as if it had just
    /// been created. Starting a running watcher does nothing.
    pub fn start(&self) -> Result<(), WatcherError> {
        let mut running = self.running();
        if running.is_some() {
            tracing::debug!(dir = %self.inner.dir.display(), "Plugin watcher already running");
            return Ok(());
        }

        if !self.inner.dir.is_dir() {
            return Err(WatcherError::DirNotFound {
                path: self.inner.dir.clone(),
            });
        }

        let (tx, rx) = mpsc::channel::<PathBuf>(EVENT_CHANNEL_CAPACITY);
        let mut watcher = recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(event) if event.kind.is_access() => {}
                Ok(event) => {
                    for path in event.paths {
                        // Use blocking_send since this callback runs in the notify thread
                        let _ = tx.blocking_send(path);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watch error"),
            }
        })?;
        watcher.watch(&self.inner.dir, RecursiveMode::NonRecursive)?;

        let initial = self.inner.scan()?;
        tracing::info!(
            dir = %self.inner.dir.display(),
            files = initial.len(),
            hot_reload = self.hot_reload_enabled(),
            "Plugin watcher started"
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.inner).run(rx, initial, shutdown.clone()));

        *running = Some(Running {
            watcher,
            shutdown,
            task,
        });
        Ok(())
    }

    fn take_running(&self) -> Option<Running> {
        self.running().take()
    }

    /// Stop watching. Pending changes are discarded; a dispatch already in
    /// progress runs to completion in the background.
    pub fn stop(&self) {
        if let Some(running) = self.take_running() {
            running.shutdown.cancel();
            tracing::info!(dir = %self.inner.dir.display(), "Plugin watcher stopped");
        }
    }

    /// Stop watching and wait for the watch task to exit
    pub async fn shutdown(&self) {
        let Some(Running {
            watcher,
            shutdown,
            task,
        }) = self.take_running()
        else {
            return;
        };

        shutdown.cancel();
        drop(watcher);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Plugin watcher task ended abnormally");
        }
        tracing::info!(dir = %self.inner.dir.display(), "Plugin watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn set_hot_reload(&self, enabled: bool) {
        self.inner.hot_reload.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Hot reload toggled");
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.inner.hot_reload.load(Ordering::SeqCst)
    }

    /// Load and register a plugin the manager does not know yet.
    ///
    /// Returns whether the plugin was registered. Failures are logged.
    pub fn try_load_new_plugin(&self, name: &str) -> bool {
        self.inner.try_load_new_plugin(name)
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatcherInner {
    /// Plugin files currently in the directory, sorted
    fn scan(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && classify(&path).is_some() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<PathBuf>,
        initial: Vec<PathBuf>,
        shutdown: CancellationToken,
    ) {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let first = Instant::now() + self.debounce;
        for path in initial {
            pending.insert(path, first);
        }

        loop {
            let next = pending.values().min().copied();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::debug!(pending = pending.len(), "Watch loop cancelled");
                    break;
                }

                received = rx.recv() => {
                    let Some(path) = received else {
                        tracing::debug!("Watch channel closed");
                        break;
                    };
                    if classify(&path).is_none() {
                        tracing::trace!(path = %path.display(), "Ignoring non-plugin file");
                        continue;
                    }
                    tracing::debug!(path = %path.display(), "Change detected, debouncing");
                    pending.insert(path, Instant::now() + self.debounce);
                }

                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    let now = Instant::now();
                    let mut due: Vec<(Instant, PathBuf)> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, deadline)| (*deadline, path.clone()))
                        .collect();
                    due.sort();

                    for (_, path) in due {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        pending.remove(&path);
                        self.dispatch(path).await;
                    }
                }
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, path: PathBuf) {
        let Some((name, kind)) = classify(&path) else {
            return;
        };
        let exists = path.exists();

        if !self.hot_reload.load(Ordering::SeqCst) {
            tracing::info!(plugin = %name, path = %path.display(), exists, "Hot reload disabled, ignoring change");
            return;
        }

        let inner = Arc::clone(self);
        let handled = tokio::task::spawn_blocking(move || {
            if exists {
                inner.handle_change(&name, kind);
            } else {
                inner.handle_removal(&name);
            }
        })
        .await;

        if let Err(e) = handled {
            tracing::error!(path = %path.display(), error = %e, "Plugin change handler panicked");
        }
    }

    fn handle_change(&self, name: &str, kind: PluginFileKind) {
        tracing::info!(plugin = %name, kind = ?kind, "Plugin file changed");

        if !self.manager.is_registered(name) {
            self.try_load_new_plugin(name);
            return;
        }

        let library = find_library(&self.dir, name).filter(|_| self.loader.is_loaded(name));
        let Some(library) = library else {
            match self.manager.reload_plugin(name) {
                Ok(()) => tracing::info!(plugin = %name, "Plugin reloaded"),
                Err(e) => tracing::error!(plugin = %name, error = %e, "Plugin reload failed"),
            }
            return;
        };

        match self.loader.load_plugin(&library, name) {
            Ok(fresh) => match self.manager.reload_plugin_with(name, fresh) {
                Ok(()) => tracing::info!(plugin = %name, "Plugin reloaded from new module"),
                Err(e) => {
                    tracing::error!(plugin = %name, error = %e, "Plugin reload failed");
                    if !self.manager.is_registered(name) {
                        self.loader.unload_plugin(name);
                    }
                }
            },
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Failed to load new module, unregistering plugin");
                if let Err(e) = self.manager.unregister(name) {
                    tracing::warn!(plugin = %name, error = %e, "Unregister after failed load returned error");
                }
            }
        }
    }

    fn handle_removal(&self, name: &str) {
        if !self.manager.is_registered(name) {
            tracing::debug!(plugin = %name, "Removed file belongs to no registered plugin");
            return;
        }

        match self.manager.unregister(name) {
            Ok(()) => tracing::info!(plugin = %name, "Plugin file removed, plugin unregistered"),
            Err(e) => tracing::warn!(plugin = %name, error = %e, "Plugin unregistered with error"),
        }
        self.loader.unload_plugin(name);
    }

    fn try_load_new_plugin(&self, name: &str) -> bool {
        let Some(library) = find_library(&self.dir, name) else {
            tracing::debug!(plugin = %name, "No compiled module yet, skipping");
            return false;
        };

        if let Some(manifest_path) = find_manifest(&self.dir, name) {
            let manifest = match load_plugin_manifest(&manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "Skipping plugin with malformed manifest");
                    return false;
                }
            };
            if !manifest.supports_runtime(API_VERSION) {
                tracing::warn!(
                    plugin = %name,
                    required = ?manifest.min_runtime_version,
                    api_version = API_VERSION,
                    "Skipping plugin that requires a newer runtime"
                );
                return false;
            }
            if let Some(missing) = manifest
                .dependencies
                .iter()
                .find(|dep| !self.manager.is_registered(dep))
            {
                tracing::warn!(plugin = %name, dependency = %missing, "Skipping plugin with unregistered dependency");
                return false;
            }
        }

        let plugin = match self.loader.load_plugin(&library, name) {
            Ok(plugin) => plugin,
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Failed to load plugin module");
                return false;
            }
        };

        match self.manager.register(plugin) {
            Ok(()) => {
                tracing::info!(plugin = %name, "New plugin registered");
                true
            }
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Failed to register plugin");
                if !self.manager.is_registered(name) {
                    self.loader.unload_plugin(name);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::library_extensions;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Records every mutating call
    #[derive(Default)]
    struct StubManager {
        registered: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubManager {
        fn with(names: &[&str]) -> Arc<Self> {
            let stub = Self::default();
            stub.registered
                .lock()
                .unwrap()
                .extend(names.iter().map(|n| n.to_string()));
            Arc::new(stub)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl PluginManager for StubManager {
        fn is_registered(&self, name: &str) -> bool {
            self.registered.lock().unwrap().contains(name)
        }

        fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
            let name = plugin.name();
            self.record(format!("register:{name}"));
            self.registered.lock().unwrap().insert(name);
            Ok(())
        }

        fn unregister(&self, name: &str) -> Result<(), RegistryError> {
            self.record(format!("unregister:{name}"));
            self.registered.lock().unwrap().remove(name);
            Ok(())
        }

        fn reload_plugin(&self, name: &str) -> Result<(), RegistryError> {
            self.record(format!("reload:{name}"));
            Ok(())
        }

        fn reload_plugin_with(
            &self,
            name: &str,
            _plugin: Arc<dyn Plugin>,
        ) -> Result<(), RegistryError> {
            self.record(format!("reload_with:{name}"));
            Ok(())
        }
    }

    fn watcher(dir: &Path, manager: Arc<StubManager>, hot_reload: bool) -> PluginWatcher {
        PluginWatcher::new(
            dir,
            manager,
            Arc::new(DynamicLoader::new()),
            WatcherOptions {
                debounce: Duration::from_millis(20),
                hot_reload,
            },
        )
    }

    #[test]
    fn test_temp_files_are_filtered() {
        for path in [
            "notes.rs.swp",
            "notes.swo",
            "notes.swx",
            "notes.tmp",
            "notes.rs~",
            ".notes.rs",
            "#notes.rs#",
        ] {
            assert!(is_temp_file(Path::new(path)), "{path} should be filtered");
            assert!(classify(Path::new(path)).is_none());
        }
        assert!(!is_temp_file(Path::new("notes.rs")));
    }

    #[test]
    fn test_classify_plugin_files() {
        let ext = library_extensions()[0];
        assert_eq!(
            classify(Path::new("/plugins/notes.rs")),
            Some(("notes".to_string(), PluginFileKind::Source))
        );
        assert_eq!(
            classify(Path::new(&format!("/plugins/libnotes.{ext}"))),
            Some(("notes".to_string(), PluginFileKind::Library))
        );
        assert_eq!(
            classify(Path::new("/plugins/notes.toml")),
            Some(("notes".to_string(), PluginFileKind::Manifest))
        );
        assert_eq!(classify(Path::new("/plugins/notes.txt")), None);
        assert_eq!(classify(Path::new("/plugins/README")), None);
    }

    #[test]
    fn test_plugin_name_from_path() {
        assert_eq!(
            plugin_name_from_path(Path::new("/a/b/calculator.rs")),
            Some("calculator".to_string())
        );
        assert_eq!(plugin_name_from_path(Path::new("/a/b/.calculator.rs")), None);
    }

    #[test]
    fn test_removal_unregisters_known_plugin() {
        let dir = TempDir::new().unwrap();
        let manager = StubManager::with(&["hot"]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        watcher.inner.handle_removal("hot");
        assert_eq!(manager.calls(), vec!["unregister:hot"]);

        watcher.inner.handle_removal("cold");
        assert_eq!(manager.calls(), vec!["unregister:hot"]);
    }

    #[test]
    fn test_change_to_known_plugin_without_module_reloads_in_place() {
        let dir = TempDir::new().unwrap();
        let manager = StubManager::with(&["hot"]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        watcher.inner.handle_change("hot", PluginFileKind::Source);
        assert_eq!(manager.calls(), vec!["reload:hot"]);
    }

    #[test]
    fn test_try_load_without_module_registers_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fresh.rs"), "// source").unwrap();
        let manager = StubManager::with(&[]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        assert!(!watcher.try_load_new_plugin("fresh"));
        assert!(manager.calls().is_empty());
    }

    #[test]
    fn test_try_load_unloadable_module_registers_nothing() {
        let dir = TempDir::new().unwrap();
        let ext = library_extensions()[0];
        std::fs::write(dir.path().join(format!("fresh.{ext}")), b"garbage").unwrap();
        let manager = StubManager::with(&[]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        assert!(!watcher.try_load_new_plugin("fresh"));
        assert!(manager.calls().is_empty());
        assert!(!watcher.inner.loader.is_loaded("fresh"));
    }

    #[test]
    fn test_try_load_skips_manifest_with_unknown_dependency() {
        let dir = TempDir::new().unwrap();
        let ext = library_extensions()[0];
        std::fs::write(dir.path().join(format!("fresh.{ext}")), b"garbage").unwrap();
        std::fs::write(
            dir.path().join("fresh.toml"),
            "name = \"fresh\"\ndependencies = [\"storage\"]\n",
        )
        .unwrap();
        let manager = StubManager::with(&[]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        assert!(!watcher.try_load_new_plugin("fresh"));
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_missing_dir_fails() {
        let manager = StubManager::with(&[]);
        let watcher = watcher(Path::new("/nonexistent/plugins"), manager, true);
        let err = watcher.start().unwrap_err();
        assert!(matches!(err, WatcherError::DirNotFound { .. }));
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_then_stop_concurrently() {
        let dir = TempDir::new().unwrap();
        let watcher = Arc::new(watcher(dir.path(), StubManager::with(&[]), true));

        watcher.start().unwrap();
        watcher.start().unwrap();
        assert!(watcher.is_running());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let watcher = watcher.clone();
                std::thread::spawn(move || watcher.stop())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!watcher.is_running());

        // Stopping again is fine
        watcher.stop();
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_with_hot_reload_disabled_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hot.rs");
        std::fs::write(&path, "// v2").unwrap();
        let manager = StubManager::with(&["hot"]);
        let watcher = watcher(dir.path(), manager.clone(), false);

        watcher.inner.dispatch(path.clone()).await;
        std::fs::remove_file(&path).unwrap();
        watcher.inner.dispatch(path).await;

        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_decides_kind_at_dispatch_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hot.rs");
        let manager = StubManager::with(&["hot"]);
        let watcher = watcher(dir.path(), manager.clone(), true);

        // Never written, so it is treated as removed
        watcher.inner.dispatch(path.clone()).await;
        assert_eq!(manager.calls(), vec!["unregister:hot"]);
    }

    #[test]
    fn test_options_from_config() {
        let config = PluginsConfig {
            debounce_ms: 250,
            hot_reload: false,
            ..Default::default()
        };
        let options = WatcherOptions::from(&config);
        assert_eq!(options.debounce, Duration::from_millis(250));
        assert!(!options.hot_reload);
    }
}
