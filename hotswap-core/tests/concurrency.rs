//! Concurrency tests for PluginRegistry
//!
//! Many threads register, toggle, execute and unregister plugins at once; the
//! registry must stay consistent with every dependency rule.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use hotswap_core::{PluginRegistry, PluginStatus, RegistryError};
use hotswap_plugin_api::{Params, Plugin, PluginDescriptor, PluginError};

struct CountingPlugin {
    descriptor: PluginDescriptor,
    live: Arc<AtomicUsize>,
}

impl CountingPlugin {
    fn new(name: &str, deps: &[&str], live: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            descriptor: PluginDescriptor::new(name, "1.0.0")
                .with_dependencies(deps.iter().copied()),
            live,
        })
    }
}

impl Plugin for CountingPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        self.descriptor.clone()
    }

    fn init(&self) -> Result<(), PluginError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), PluginError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&self, _params: &Params) -> Result<serde_json::Value, PluginError> {
        Ok(serde_json::json!({ "name": self.descriptor.name }))
    }
}

#[test]
fn concurrent_registrations_of_distinct_plugins_all_succeed() {
    let registry = PluginRegistry::new();
    let live = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let live = Arc::clone(&live);
            thread::spawn(move || {
                registry
                    .register(CountingPlugin::new(&format!("p{i}"), &[], live))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 16);
    assert_eq!(live.load(Ordering::SeqCst), 16);
}

#[test]
fn concurrent_duplicate_registration_admits_exactly_one() {
    let registry = PluginRegistry::new();
    let live = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let live = Arc::clone(&live);
            thread::spawn(move || registry.register(CountingPlugin::new("shared", &[], live)))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results.iter().all(|r| match r {
        Ok(()) => true,
        Err(e) => matches!(e, RegistryError::AlreadyRegistered { .. }),
    }));
    assert_eq!(live.load(Ordering::SeqCst), 1);
}

#[test]
fn disable_never_succeeds_while_dependent_is_enabled() {
    let registry = PluginRegistry::new();
    let live = Arc::new(AtomicUsize::new(0));
    registry
        .register(CountingPlugin::new("base", &[], live.clone()))
        .unwrap();
    registry
        .register(CountingPlugin::new("app", &["base"], live.clone()))
        .unwrap();

    let togglers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    match registry.disable_plugin("base") {
                        Ok(()) | Err(RegistryError::DependencyBlocked { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    registry.enable_plugin("base").unwrap();
                }
            })
        })
        .collect();

    let app = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for _ in 0..200 {
                let _ = registry.disable_plugin("app");
                let _ = registry.enable_plugin("app");
            }
        })
    };

    for handle in togglers {
        handle.join().unwrap();
    }
    app.join().unwrap();

    // Final state still honors the rule
    if registry.plugin_status("app") == Some(PluginStatus::Enabled) {
        assert_eq!(registry.plugin_status("base"), Some(PluginStatus::Enabled));
    }
}

#[test]
fn execute_runs_while_plugins_are_reloaded() {
    let registry = PluginRegistry::new();
    let live = Arc::new(AtomicUsize::new(0));
    registry
        .register(CountingPlugin::new("calc", &[], live.clone()))
        .unwrap();

    let reloader = {
        let registry = Arc::clone(&registry);
        let live = Arc::clone(&live);
        thread::spawn(move || {
            for _ in 0..100 {
                registry
                    .reload_plugin_with("calc", CountingPlugin::new("calc", &[], live.clone()))
                    .unwrap();
            }
        })
    };

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..100 {
                    let value = registry.execute_plugin("calc", &Params::new()).unwrap();
                    assert_eq!(value["name"], "calc");
                }
            })
        })
        .collect();

    reloader.join().unwrap();
    for caller in callers {
        caller.join().unwrap();
    }

    // Every reload shut the previous instance down
    assert_eq!(live.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_unregister_and_reads_stay_consistent() {
    let registry = PluginRegistry::new();
    let live = Arc::new(AtomicUsize::new(0));
    for i in 0..32 {
        registry
            .register(CountingPlugin::new(&format!("p{i}"), &[], live.clone()))
            .unwrap();
    }

    let removers: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in (t..32).step_by(4) {
                    registry.unregister(&format!("p{i}")).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for _ in 0..100 {
                let infos = registry.all_plugins_info();
                let names: Vec<_> = infos.iter().map(|i| i.name.clone()).collect();
                let mut sorted = names.clone();
                sorted.sort();
                assert_eq!(names, sorted);
                assert!(registry.dependency_graph().len() <= 32);
            }
        })
    };

    for handle in removers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert!(registry.is_empty());
    assert_eq!(live.load(Ordering::SeqCst), 0);
}
