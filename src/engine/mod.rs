//! The automation engine.
//!
//! This module provides:
//! - The [`Engine`] trait the lifecycle orchestrator drives
//! - A file-backed implementation, [`LocalEngine`]
//! - Stack state, its store and lock files
//! - Provider plugins and the workspace plugin manifest
//! - The diff that turns declarations into steps

mod diff;
mod local;
mod lock;
mod plugin;
mod state;
mod store;
mod workspace;

#[cfg(test)]
pub(crate) mod fake;

pub use diff::{DiffAction, FieldChange, ResourceDiff, StackDiff, compute_diff};
pub use local::LocalEngine;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
#[cfg(test)]
pub use plugin::MockProviderPlugin;
pub use plugin::{
    CreatedResource, InstalledPlugin, PluginManifest, PluginRegistry, ProviderConfig,
    ProviderPlugin,
};
pub use state::{
    ConfigEntry, CredentialDigest, HistoryEntry, InstanceOutputs, Operation, PendingCreate,
    ResourceState, STATE_VERSION, StackState,
};
pub use store::{LocalStackStore, StackStore};
pub use workspace::{
    ConfigValue, Engine, EngineEvent, ProgressSink, ResourceSummary, StackKey, TracingProgress,
    UpdateSummary,
};
