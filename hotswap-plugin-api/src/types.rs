//! Plugin types and metadata structures

use serde::{Deserialize, Serialize};

/// Free-form parameter bag passed to [`crate::Plugin::execute`]
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Identity and declared relationships reported by a plugin instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    pub description: String,
    pub version: String,
    /// Plugins that must be registered before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Plugins that must never be registered alongside this one
    #[serde(default)]
    pub conflicts: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conflicts<I, S>(mut self, conflicts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflicts = conflicts.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }

    pub fn conflicts_with(&self, name: &str) -> bool {
        self.conflicts.iter().any(|c| c == name)
    }
}

/// Sidecar manifest describing a plugin before its code is loaded
///
/// Shipped next to the compiled library as `<name>.toml` or `<name>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginManifest {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    /// Symbol or function the plugin is entered through
    pub entry_point: String,
    pub build_tags: Vec<String>,
    /// Minimum host plugin API version required
    #[serde(
        alias = "required_version",
        alias = "required_go_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_runtime_version: Option<String>,
}

impl PluginManifest {
    /// Whether a host exposing `api_version` satisfies this manifest.
    ///
    /// Only plain integer requirements are enforced; anything else is accepted.
    pub fn supports_runtime(&self, api_version: u32) -> bool {
        match self
            .min_runtime_version
            .as_deref()
            .map(|v| v.trim().parse::<u32>())
        {
            Some(Ok(required)) => required <= api_version,
            _ => true,
        }
    }
}

impl From<&PluginManifest> for PluginDescriptor {
    fn from(manifest: &PluginManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            description: manifest.description.clone(),
            version: manifest.version.clone(),
            dependencies: manifest.dependencies.clone(),
            conflicts: manifest.conflicts.clone(),
        }
    }
}
