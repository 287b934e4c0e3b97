//! Provider plugins.
//!
//! A plugin knows how to read, create, update and delete one provider's
//! resources. Plugins are registered in a [`PluginRegistry`]; installing one
//! into a workspace records it in the workspace's plugin manifest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::error::{EngineError, EngineResult, StateError};
use crate::program::{InstanceArgs, InstanceInputs};

use super::state::InstanceOutputs;
use super::workspace::ConfigValue;

/// Configuration handed to a plugin, keyed without the plugin prefix.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    plugin: String,
    values: BTreeMap<String, ConfigValue>,
}

/// A resource the provider just created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Provider outputs.
    pub outputs: InstanceOutputs,
}

/// A provider implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Plugin name, e.g. `linode`.
    fn name(&self) -> &'static str;

    /// Plugin version, e.g. `v3.7.1`.
    fn version(&self) -> &'static str;

    /// Configuration keys (without prefix) that must be set before any call.
    fn required_config(&self) -> &'static [&'static str];

    /// Reads a resource; `None` if it no longer exists.
    async fn read(&self, config: &ProviderConfig, id: &str) -> EngineResult<Option<InstanceOutputs>>;

    /// Creates a resource.
    async fn create(&self, config: &ProviderConfig, args: &InstanceArgs)
    -> EngineResult<CreatedResource>;

    /// Updates the in-place inputs of a resource.
    async fn update(
        &self,
        config: &ProviderConfig,
        id: &str,
        inputs: &InstanceInputs,
    ) -> EngineResult<InstanceOutputs>;

    /// Deletes a resource. Deleting a resource that is already gone succeeds.
    async fn delete(&self, config: &ProviderConfig, id: &str) -> EngineResult<()>;

    /// Looks for a resource created with `inputs` whose create response was
    /// never seen; `None` if the provider has no such resource.
    async fn find(
        &self,
        config: &ProviderConfig,
        inputs: &InstanceInputs,
    ) -> EngineResult<Option<CreatedResource>>;
}

/// Plugins available to an engine, by name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn ProviderPlugin>>,
}

/// Plugins installed in a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Installed plugins, in install order.
    #[serde(default)]
    pub plugins: Vec<InstalledPlugin>,
}

/// One installed plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPlugin {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// When it was installed.
    pub installed_at: DateTime<Utc>,
}

impl ProviderConfig {
    /// Creates an empty configuration for a plugin.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            values: BTreeMap::new(),
        }
    }

    /// Sets a value.
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Gets a value that must be present.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfig` with the fully qualified key if it is unset.
    pub fn require(&self, key: &str) -> EngineResult<&ConfigValue> {
        self.get(key).ok_or_else(|| EngineError::MissingConfig {
            key: format!("{}:{key}", self.plugin),
        })
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under its own name.
    pub fn register(&mut self, plugin: Arc<dyn ProviderPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    /// Adds a plugin, builder style.
    #[must_use]
    pub fn with(mut self, plugin: Arc<dyn ProviderPlugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Gets a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderPlugin>> {
        self.plugins.get(name).cloned()
    }

    /// Finds the plugin matching a name and version.
    ///
    /// # Errors
    ///
    /// Returns an error if no plugin has that name or it provides another version.
    pub fn resolve(&self, name: &str, version: &str) -> EngineResult<Arc<dyn ProviderPlugin>> {
        let plugin = self.get(name).ok_or_else(|| EngineError::PluginNotAvailable {
            name: name.to_string(),
        })?;

        if plugin.version() != version {
            return Err(EngineError::PluginVersionMismatch {
                name: name.to_string(),
                requested: version.to_string(),
                available: plugin.version().to_string(),
            });
        }

        Ok(plugin)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.plugins.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

impl PluginManifest {
    /// Loads the manifest, or an empty one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read plugin manifest: {e}"),
        })?;

        serde_json::from_str(&content).map_err(|e| {
            StateError::Corrupted {
                message: format!("Failed to parse plugin manifest: {e}"),
            }
            .into()
        })
    }

    /// Writes the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                StateError::storage(format!("Failed to create plugin directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize manifest: {e}")))?;

        fs::write(path, content)
            .await
            .map_err(|e| StateError::storage(format!("Failed to write plugin manifest: {e}")))?;

        debug!("Plugin manifest saved to {}", path.display());
        Ok(())
    }

    /// Checks whether a plugin version is installed.
    #[must_use]
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.plugins
            .iter()
            .any(|p| p.name == name && p.version == version)
    }

    /// Checks whether any version of a plugin is installed.
    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name == name)
    }

    /// Records an install; returns false if it was already recorded.
    pub fn record(&mut self, name: &str, version: &str) -> bool {
        if self.contains(name, version) {
            return false;
        }
        self.plugins.push(InstalledPlugin {
            name: name.to_string(),
            version: version.to_string(),
            installed_at: Utc::now(),
        });
        true
    }
}
