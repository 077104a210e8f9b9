//! Example hotswap plugin
//!
//! Registers as `hello`, serves `GET /plugins/hello/greet/:name`, and answers
//! `execute` with a greeting for the `name` parameter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hotswap_plugin_api::{
    HttpMethod, Params, Plugin, PluginDescriptor, PluginError, Route, RouteResponse,
};

#[derive(Default)]
pub struct HelloPlugin {
    greetings: Arc<AtomicU64>,
}

fn greet(greetings: &AtomicU64, name: &str) -> serde_json::Value {
    let count = greetings.fetch_add(1, Ordering::Relaxed) + 1;
    serde_json::json!({ "message": format!("Hello, {name}!"), "count": count })
}

impl Plugin for HelloPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new("hello", env!("CARGO_PKG_VERSION"))
            .with_description("Greets callers and counts greetings")
    }

    fn init(&self) -> Result<(), PluginError> {
        self.greetings.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn routes(&self) -> Vec<Route> {
        let greetings = Arc::clone(&self.greetings);
        vec![
            Route::new(HttpMethod::Get, "/greet/:name", move |request| {
                let name = request.params.get("name").map_or("world", String::as_str);
                RouteResponse::json(200, &greet(&greetings, name))
                    .unwrap_or_else(|e| RouteResponse::text(500, e.to_string()))
            })
            .with_tags(["demo"])
            .with_description("Greet someone by name"),
        ]
    }

    fn execute(&self, params: &Params) -> Result<serde_json::Value, PluginError> {
        let name = match params.get("name") {
            None => "world",
            Some(serde_json::Value::String(name)) => name.as_str(),
            Some(_) => return Err(PluginError::invalid_input("'name' must be a string")),
        };
        Ok(greet(&self.greetings, name))
    }
}

hotswap_plugin_api::export_plugin!(HelloPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_greets_and_counts() {
        let plugin = HelloPlugin::default();
        plugin.init().unwrap();

        let mut params = Params::new();
        params.insert("name".into(), "Ada".into());
        let first = plugin.execute(&params).unwrap();
        assert_eq!(first["message"], "Hello, Ada!");
        assert_eq!(first["count"], 1);

        let second = plugin.execute(&Params::new()).unwrap();
        assert_eq!(second["message"], "Hello, world!");
        assert_eq!(second["count"], 2);
    }

    #[test]
    fn test_execute_rejects_non_string_name() {
        let plugin = HelloPlugin::default();
        let mut params = Params::new();
        params.insert("name".into(), 7.into());
        assert!(plugin.execute(&params).is_err());
    }

    #[test]
    fn test_exported_api_version_matches() {
        assert_eq!(_hotswap_plugin_api_version(), hotswap_plugin_api::API_VERSION);
    }
}
