//! hotswap-plugin-api - Plugin API for the hotswap runtime plugin manager
//!
//! This crate provides the traits and types needed to write plugins for hotswap.
//! Plugins are native Rust dynamic libraries (or in-process types) that declare
//! their dependencies and conflicts, expose HTTP-style routes, and can be
//! executed with a free-form parameter bag.
//!
//! # Example
//!
//! ```ignore
//! use hotswap_plugin_api::{Params, Plugin, PluginDescriptor, PluginError, export_plugin};
//!
//! #[derive(Default)]
//! pub struct Greeter;
//!
//! impl Plugin for Greeter {
//!     fn descriptor(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("greeter", "0.1.0").with_description("Says hello")
//!     }
//!
//!     fn init(&self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//!
//!     fn shutdown(&self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//!
//!     fn execute(&self, _params: &Params) -> Result<serde_json::Value, PluginError> {
//!         Ok(serde_json::json!({ "greeting": "hello" }))
//!     }
//! }
//!
//! export_plugin!(Greeter);
//! ```

use std::any::Any;
use std::sync::Weak;

pub mod error;
pub mod http;
pub mod types;

pub use error::PluginError;
pub use http::{HttpMethod, Middleware, Route, RouteHandler, RouteRequest, RouteResponse};
pub use types::{Params, PluginDescriptor, PluginManifest};

/// Current plugin API version. Plugins must match this exactly.
/// This is checked when loading plugins to ensure compatibility.
pub const API_VERSION: u32 = 1;

/// Handle to the registry a plugin was registered into.
///
/// Upgrade it and downcast to the host's registry type to call back into it.
/// Calling mutating registry operations from inside a lifecycle callback
/// deadlocks, since callbacks run under the registry's write lock.
pub type RegistryHandle = Weak<dyn Any + Send + Sync>;

/// The core plugin trait - implement this to create a hotswap plugin.
///
/// Methods take `&self` so instances can be shared between the registry and
/// in-flight executions; use interior mutability for plugin state.
pub trait Plugin: Send + Sync {
    /// Identity and declared relationships
    fn descriptor(&self) -> PluginDescriptor;

    /// Unique plugin name
    fn name(&self) -> String {
        self.descriptor().name
    }

    /// Called when the plugin is registered (and again on every reload)
    fn init(&self) -> Result<(), PluginError>;

    /// Called when the plugin is unregistered (and before every reload)
    fn shutdown(&self) -> Result<(), PluginError>;

    fn on_enable(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_disable(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Routes to bind under `/plugins/<name>`
    fn routes(&self) -> Vec<Route> {
        Vec::new()
    }

    /// Middlewares applied to every route of this plugin, before per-route ones
    fn default_middlewares(&self) -> Vec<Middleware> {
        Vec::new()
    }

    /// Run the plugin with a free-form parameter bag
    fn execute(&self, params: &Params) -> Result<serde_json::Value, PluginError>;

    /// Receives the registry handle right before `init`
    fn attach(&self, _registry: RegistryHandle) {}
}

/// Export a plugin type for dynamic loading.
///
/// This macro generates the C ABI entry points that the hotswap loader
/// resolves after opening a plugin library.
///
/// # Usage
///
/// ```ignore
/// hotswap_plugin_api::export_plugin!(MyPlugin);
/// ```
///
/// # Generated Functions
///
/// - `_hotswap_plugin_create()`: Creates a new plugin instance
/// - `_hotswap_plugin_api_version()`: Returns the API version
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _hotswap_plugin_create() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::default());
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _hotswap_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl Plugin for Minimal {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::new("minimal", "1.0.0")
        }

        fn init(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn shutdown(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn execute(&self, params: &Params) -> Result<serde_json::Value, PluginError> {
            Ok(serde_json::Value::Object(params.clone()))
        }
    }

    #[test]
    fn test_api_version_is_set() {
        assert_eq!(API_VERSION, 1);
    }

    #[test]
    fn test_plugin_trait_is_object_safe() {
        // This compiles only if Plugin is object-safe
        fn _takes_boxed_plugin(_: Box<dyn Plugin>) {}
    }

    #[test]
    fn test_default_methods() {
        let plugin = Minimal;
        assert_eq!(plugin.name(), "minimal");
        assert!(plugin.on_enable().is_ok());
        assert!(plugin.on_disable().is_ok());
        assert!(plugin.routes().is_empty());
        assert!(plugin.default_middlewares().is_empty());
    }

    #[test]
    fn test_execute_receives_params() {
        let mut params = Params::new();
        params.insert("x".into(), serde_json::json!(3));

        let result = Minimal.execute(&params).unwrap();
        assert_eq!(result["x"], 3);
    }
}
