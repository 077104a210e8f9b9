//! Integration tests for the plugin directory watcher
//!
//! These drive a real `notify` watcher over a temp directory against a real
//! registry holding an in-process plugin, and check that:
//! - the initial scan reloads plugins whose files are already present
//! - editing a plugin file reloads it once the debounce settles
//! - deleting the file unregisters the plugin
//! - nothing changes while hot reload is off

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hotswap_core::{DynamicLoader, PluginRegistry, PluginWatcher, WatcherOptions};
use hotswap_plugin_api::{Params, Plugin, PluginDescriptor, PluginError};
use tempfile::TempDir;

#[derive(Default)]
struct HotPlugin {
    inits: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl Plugin for HotPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("hot", "1.0.0")
    }

    fn init(&self) -> Result<(), PluginError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), PluginError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&self, _params: &Params) -> Result<serde_json::Value, PluginError> {
        Ok(serde_json::Value::Null)
    }
}

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Poll until `condition` holds or five seconds pass
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn setup(dir: &Path, hot_reload: bool) -> (Arc<PluginRegistry>, Arc<HotPlugin>, PluginWatcher) {
    std::fs::write(dir.join("hot.rs"), "// v1\n").unwrap();

    let registry = PluginRegistry::new();
    let plugin = Arc::new(HotPlugin::default());
    registry.register(plugin.clone()).unwrap();

    let watcher = PluginWatcher::new(
        dir,
        registry.clone(),
        Arc::new(DynamicLoader::new()),
        WatcherOptions {
            debounce: DEBOUNCE,
            hot_reload,
        },
    );
    (registry, plugin, watcher)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_reloads_and_delete_unregisters() {
    let dir = TempDir::new().unwrap();
    let (registry, plugin, watcher) = setup(dir.path(), true);
    watcher.start().unwrap();

    // Initial scan treats hot.rs as newly created
    assert!(wait_for(|| plugin.inits.load(Ordering::SeqCst) >= 2).await);
    let after_scan = plugin.inits.load(Ordering::SeqCst);

    std::fs::write(dir.path().join("hot.rs"), "// v2\n").unwrap();
    assert!(wait_for(|| plugin.inits.load(Ordering::SeqCst) > after_scan).await);
    assert!(registry.contains("hot"));
    assert_eq!(
        plugin.shutdowns.load(Ordering::SeqCst) + 1,
        plugin.inits.load(Ordering::SeqCst)
    );

    std::fs::remove_file(dir.path().join("hot.rs")).unwrap();
    assert!(wait_for(|| !registry.contains("hot")).await);
    assert_eq!(
        plugin.shutdowns.load(Ordering::SeqCst),
        plugin.inits.load(Ordering::SeqCst)
    );

    watcher.shutdown().await;
    assert!(!watcher.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_writes_is_debounced() {
    let dir = TempDir::new().unwrap();
    let (_registry, plugin, watcher) = setup(dir.path(), true);
    watcher.start().unwrap();
    assert!(wait_for(|| plugin.inits.load(Ordering::SeqCst) >= 2).await);
    tokio::time::sleep(DEBOUNCE * 3).await;
    let before = plugin.inits.load(Ordering::SeqCst);

    for version in 0..5 {
        std::fs::write(dir.path().join("hot.rs"), format!("// v{version}\n")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(wait_for(|| plugin.inits.load(Ordering::SeqCst) > before).await);
    tokio::time::sleep(DEBOUNCE * 5).await;
    assert_eq!(plugin.inits.load(Ordering::SeqCst), before + 1);

    watcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hot_reload_off_leaves_registry_untouched() {
    let dir = TempDir::new().unwrap();
    let (registry, plugin, watcher) = setup(dir.path(), false);
    watcher.start().unwrap();

    std::fs::write(dir.path().join("hot.rs"), "// v2\n").unwrap();
    std::fs::write(dir.path().join("fresh.rs"), "// new\n").unwrap();
    tokio::time::sleep(DEBOUNCE * 5).await;
    std::fs::remove_file(dir.path().join("hot.rs")).unwrap();
    tokio::time::sleep(DEBOUNCE * 5).await;

    assert_eq!(plugin.inits.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.shutdowns.load(Ordering::SeqCst), 0);
    assert_eq!(registry.list_plugins(), vec!["hot"]);

    watcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_discards_pending_changes() {
    let dir = TempDir::new().unwrap();
    let (registry, plugin, watcher) = setup(dir.path(), true);
    watcher.start().unwrap();
    watcher.stop();

    tokio::time::sleep(DEBOUNCE * 5).await;
    std::fs::remove_file(dir.path().join("hot.rs")).unwrap();
    tokio::time::sleep(DEBOUNCE * 5).await;

    assert_eq!(plugin.inits.load(Ordering::SeqCst), 1);
    assert!(registry.contains("hot"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn editor_temp_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    let (_registry, plugin, watcher) = setup(dir.path(), true);
    watcher.start().unwrap();
    assert!(wait_for(|| plugin.inits.load(Ordering::SeqCst) >= 2).await);
    tokio::time::sleep(DEBOUNCE * 3).await;
    let before = plugin.inits.load(Ordering::SeqCst);

    std::fs::write(dir.path().join(".hot.rs.swp"), "swap").unwrap();
    std::fs::write(dir.path().join("hot.rs~"), "backup").unwrap();
    tokio::time::sleep(DEBOUNCE * 5).await;

    assert_eq!(plugin.inits.load(Ordering::SeqCst), before);
    watcher.shutdown().await;
}
