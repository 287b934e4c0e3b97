//! The automation engine interface.
//!
//! The orchestrator drives stacks only through [`Engine`]. Implementations
//! own persisted state, the plugin cache and configuration storage.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::program::DeploymentProgram;

use super::diff::DiffAction;
use super::state::{InstanceOutputs, Operation};

/// Identifies a stack within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackKey {
    /// Stack name.
    pub stack: String,
    /// Owning project.
    pub project: String,
}

/// A configuration value set on a stack.
pub enum ConfigValue {
    /// Stored and displayed as-is.
    Plain(String),
    /// Held in memory only; never persisted or displayed.
    Secret(SecretString),
}

/// What an engine operation changed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    /// Operation performed.
    pub operation: Operation,
    /// Resources created.
    pub created: usize,
    /// Resources updated in place.
    pub updated: usize,
    /// Resources deleted and recreated.
    pub replaced: usize,
    /// Resources deleted.
    pub deleted: usize,
    /// Resources left untouched.
    pub unchanged: usize,
    /// Resources remaining in the stack, by name.
    pub resources: BTreeMap<String, ResourceSummary>,
}

/// A resource as reported after an operation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    /// Provider-assigned identifier.
    pub id: String,
    /// Provider outputs.
    #[serde(flatten)]
    pub outputs: InstanceOutputs,
}

/// Progress reported while an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An operation started on a stack.
    OperationStarted {
        /// Stack key.
        stack: StackKey,
        /// Operation.
        operation: Operation,
    },
    /// A step on one resource started.
    StepStarted {
        /// Resource name.
        resource: String,
        /// Action taken.
        action: DiffAction,
    },
    /// A step on one resource finished.
    StepCompleted {
        /// Resource name.
        resource: String,
        /// Action taken.
        action: DiffAction,
    },
    /// A step on one resource failed.
    StepFailed {
        /// Resource name.
        resource: String,
        /// Action attempted.
        action: DiffAction,
        /// Failure description.
        message: String,
    },
    /// An operation finished successfully.
    OperationCompleted {
        /// Stack key.
        stack: StackKey,
        /// Operation summary.
        summary: UpdateSummary,
    },
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &EngineEvent);
}

/// Writes progress events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

/// Automation engine operations used by the lifecycle orchestrator.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Installs a provider plugin into the workspace. Idempotent.
    async fn install_plugin(&self, name: &str, version: &str) -> EngineResult<()>;

    /// Returns true if the plugin is already installed at this version.
    async fn has_plugin(&self, name: &str, version: &str) -> EngineResult<bool>;

    /// Selects an existing stack; fails with `StackNotFound` if there is none.
    async fn select_stack(&self, key: &StackKey) -> EngineResult<()>;

    /// Selects a stack, creating it if it does not exist.
    async fn upsert_stack(&self, key: &StackKey) -> EngineResult<()>;

    /// Sets a configuration value on a stack.
    async fn set_config(&self, key: &StackKey, config_key: &str, value: ConfigValue)
    -> EngineResult<()>;

    /// Reconciles recorded state with the provider.
    async fn refresh(&self, key: &StackKey) -> EngineResult<UpdateSummary>;

    /// Applies a program to a stack.
    async fn up(&self, key: &StackKey, program: &DeploymentProgram) -> EngineResult<UpdateSummary>;

    /// Removes every resource of a stack.
    async fn destroy(&self, key: &StackKey) -> EngineResult<UpdateSummary>;
}

impl StackKey {
    /// Creates a key.
    #[must_use]
    pub fn new(stack: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
        }
    }
}

impl std::fmt::Display for StackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project, self.stack)
    }
}

impl ConfigValue {
    /// Wraps a secret value.
    #[must_use]
    pub fn secret(value: &SecretString) -> Self {
        Self::Secret(SecretString::from(value.expose_secret().to_owned()))
    }

    /// Returns true if the value is secret.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    /// Returns the raw value. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Secret(value) => value.expose_secret(),
        }
    }
}

impl Clone for ConfigValue {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(value) => Self::Plain(value.clone()),
            Self::Secret(value) => Self::secret(value),
        }
    }
}

impl std::fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Self::Secret(_) => f.write_str("Secret([REDACTED])"),
        }
    }
}

impl UpdateSummary {
    /// Creates an empty summary.
    #[must_use]
    pub const fn new(operation: Operation) -> Self {
        Self {
            operation,
            created: 0,
            updated: 0,
            replaced: 0,
            deleted: 0,
            unchanged: 0,
            resources: BTreeMap::new(),
        }
    }

    /// Total number of resources that changed.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Counts one completed step.
    pub fn record(&mut self, action: DiffAction) {
        match action {
            DiffAction::Create => self.created += 1,
            DiffAction::Update => self.updated += 1,
            DiffAction::Replace => self.replaced += 1,
            DiffAction::Delete => self.deleted += 1,
            DiffAction::Same => self.unchanged += 1,
        }
    }
}

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::OperationStarted { stack, operation } => {
                info!("Starting {operation} of {stack}");
            }
            EngineEvent::StepStarted { resource, action } => {
                info!("  {action} {resource}...");
            }
            EngineEvent::StepCompleted { resource, action } => {
                info!("  {action} {resource} done");
            }
            EngineEvent::StepFailed {
                resource,
                action,
                message,
            } => {
                warn!("  {action} {resource} failed: {message}");
            }
            EngineEvent::OperationCompleted { stack, summary } => {
                info!(
                    "{} of {stack} complete: {} created, {} updated, {} replaced, {} deleted, {} unchanged",
                    summary.operation,
                    summary.created,
                    summary.updated,
                    summary.replaced,
                    summary.deleted,
                    summary.unchanged
                );
            }
        }
    }
}
