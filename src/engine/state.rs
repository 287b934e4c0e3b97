//! Stack state types.
//!
//! This is what the engine records for a stack between runs: the resources it
//! manages, the configuration keys that were set, and a short history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::program::InstanceInputs;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept per stack.
const MAX_HISTORY: usize = 100;

/// The recorded state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Owning project.
    pub project: String,
    /// Hash of the program declarations of the last successful update.
    #[serde(default)]
    pub program_hash: String,
    /// Managed resources by name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Configuration keys set on the stack.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigEntry>,
    /// Creates sent to the provider whose result was never recorded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<String, PendingCreate>,
    /// When the stack was created.
    pub created_at: DateTime<Utc>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent operations.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A recorded configuration key.
///
/// Secret values are never written to disk; only the fact that the key is
/// set survives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Whether the value is secret.
    pub secret: bool,
    /// Plain value, absent for secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// State of one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource name inside the program.
    pub name: String,
    /// Plugin that manages the resource.
    pub provider: String,
    /// Resource type token.
    pub kind: String,
    /// Provider-assigned identifier.
    pub id: String,
    /// Non-secret inputs the resource was created or updated with.
    pub inputs: InstanceInputs,
    /// Hash of `inputs`.
    pub input_hash: String,
    /// Digest of the root credential the resource was created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialDigest>,
    /// Last known provider outputs.
    #[serde(default)]
    pub outputs: InstanceOutputs,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed or refreshed.
    pub updated_at: DateTime<Utc>,
}

/// Salted SHA-256 of a credential. The credential itself is never recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialDigest {
    /// Per-resource salt.
    pub salt: String,
    /// Hex digest of salt and credential.
    pub digest: String,
}

/// A create that was started but whose outcome is unknown.
///
/// Written before the provider is asked to create the resource and cleared
/// once the result is recorded. If the call is abandoned midway, the next
/// operation on the stack asks the provider whether the resource exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCreate {
    /// Resource name inside the program.
    pub name: String,
    /// Plugin asked to create the resource.
    pub provider: String,
    /// Resource type token.
    pub kind: String,
    /// Inputs the create was sent with.
    pub inputs: InstanceInputs,
    /// Digest of the credential the create was sent with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialDigest>,
    /// When the create was sent.
    pub started_at: DateTime<Utc>,
}

/// Provider outputs of an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOutputs {
    /// Provider status string, e.g. `running`.
    #[serde(default)]
    pub status: String,
    /// Public and private IPv4 addresses.
    #[serde(default)]
    pub ipv4: Vec<String>,
    /// IPv6 address, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

/// A single entry in the stack history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
}

/// Operations recorded in the history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Recorded state reconciled with the provider.
    Refresh,
    /// Program applied.
    Update,
    /// All resources removed.
    Destroy,
}

impl StackState {
    /// Creates a new empty stack state.
    #[must_use]
    pub fn new(stack: &str, project: &str) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            project: project.to_string(),
            program_hash: String::new(),
            resources: BTreeMap::new(),
            config: BTreeMap::new(),
            pending: BTreeMap::new(),
            created_at: now,
            last_updated: now,
            history: Vec::new(),
        }
    }

    /// Adds or replaces a resource.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.name.clone(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource by name.
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(name);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Records a create about to be sent to the provider.
    pub fn mark_pending(&mut self, pending: PendingCreate) {
        self.pending.insert(pending.name.clone(), pending);
        self.last_updated = Utc::now();
    }

    /// Forgets a pending create, returning it.
    pub fn clear_pending(&mut self, name: &str) -> Option<PendingCreate> {
        let cleared = self.pending.remove(name);
        if cleared.is_some() {
            self.last_updated = Utc::now();
        }
        cleared
    }

    /// Records a configuration key.
    pub fn set_config(&mut self, key: &str, entry: ConfigEntry) {
        self.config.insert(key.to_string(), entry);
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Names of all managed resources.
    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: Operation, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: Operation, resources: Vec<String>, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, resources)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Refresh => "refresh",
            Self::Update => "update",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
