//! Provider plugin installation.

use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{EngineError, Result, StackError};
use crate::linode::{PLUGIN_NAME, PLUGIN_VERSION};

/// A provider plugin pinned to one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginPin {
    /// Plugin name.
    pub name: &'static str,
    /// Exact version.
    pub version: &'static str,
}

impl PluginPin {
    /// The Linode provider pin every run uses.
    pub const LINODE: Self = Self {
        name: PLUGIN_NAME,
        version: PLUGIN_VERSION,
    };

    fn failed(self, source: EngineError) -> StackError {
        StackError::PluginInstall {
            name: self.name.to_string(),
            version: self.version.to_string(),
            source,
        }
    }
}

impl Default for PluginPin {
    fn default() -> Self {
        Self::LINODE
    }
}

/// Installs the pinned plugin unconditionally.
///
/// # Errors
///
/// Returns `PluginInstall` if the engine cannot install it.
pub async fn ensure_plugin(engine: &dyn Engine, pin: PluginPin) -> Result<()> {
    info!("Installing plugin {} {}", pin.name, pin.version);
    engine
        .install_plugin(pin.name, pin.version)
        .await
        .map_err(|e| pin.failed(e))
}

/// Installs the pinned plugin only if the workspace lacks it.
///
/// Returns true if an install happened.
///
/// # Errors
///
/// Returns `PluginInstall` if the check or the install fails.
pub async fn ensure_plugin_if_missing(engine: &dyn Engine, pin: PluginPin) -> Result<bool> {
    let present = engine
        .has_plugin(pin.name, pin.version)
        .await
        .map_err(|e| pin.failed(e))?;
    if present {
        debug!("Plugin {} {} already installed", pin.name, pin.version);
        return Ok(false);
    }
    ensure_plugin(engine, pin).await?;
    Ok(true)
}
