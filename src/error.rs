//! Error types for the stack lifecycle system.
//!
//! Errors are layered: the provider and the state store report to the engine,
//! and the orchestrator wraps engine failures into the lifecycle taxonomy that
//! entry points map onto responses.

use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::LifecyclePhase;

/// The main error type, one variant per lifecycle failure kind.
#[derive(Debug, Error)]
pub enum StackError {
    /// The request does not describe a deployable VM.
    #[error("Invalid specification: {message}")]
    InvalidSpecification {
        /// Description of the problem.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The provider plugin could not be installed.
    #[error("Failed to install plugin {name} {version}: {source}")]
    PluginInstall {
        /// Plugin name.
        name: String,
        /// Requested plugin version.
        version: String,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// Configuration is missing or was rejected.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Refreshing recorded state against the provider failed.
    #[error("Failed to refresh stack {stack}: {source}")]
    Refresh {
        /// Stack name.
        stack: String,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// Applying the deployment program failed.
    #[error("Failed to update stack {stack}: {source}")]
    Apply {
        /// Stack name.
        stack: String,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// Destroying the stack's resources failed.
    #[error("Failed to destroy stack {stack}: {source}")]
    Destroy {
        /// Stack name.
        stack: String,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// The caller cancelled the run or its deadline passed.
    #[error("Run cancelled during phase {phase}")]
    Cancelled {
        /// Phase that was in flight.
        phase: LifecyclePhase,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// Caller error, not retried.
    InvalidSpecification,
    /// Plugin could not be installed.
    PluginInstallError,
    /// Secret or settings missing.
    ConfigurationError,
    /// Refresh failed.
    RefreshError,
    /// Update failed.
    ApplyError,
    /// Destroy failed.
    DestroyError,
    /// The engine rejected the declared resource shape.
    ResourceDeclarationError,
    /// Caller-initiated abort.
    Cancelled,
    /// Anything else.
    InternalError,
}

/// Errors raised by the automation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No stack with this name exists in the project.
    #[error("stack '{stack}' not found in project '{project}'")]
    StackNotFound {
        /// Stack name.
        stack: String,
        /// Project name.
        project: String,
    },

    /// No plugin is registered under this name.
    #[error("plugin '{name}' is not available")]
    PluginNotAvailable {
        /// Plugin name.
        name: String,
    },

    /// The registered plugin does not provide the requested version.
    #[error("plugin '{name}' version mismatch: requested {requested}, available {available}")]
    PluginVersionMismatch {
        /// Plugin name.
        name: String,
        /// Requested version.
        requested: String,
        /// Version the registry provides.
        available: String,
    },

    /// A resource needs a plugin that was never installed in the workspace.
    #[error("plugin '{name}' is not installed in the workspace")]
    PluginNotInstalled {
        /// Plugin name.
        name: String,
    },

    /// A required configuration key has not been set on the stack.
    #[error("missing required configuration key '{key}'")]
    MissingConfig {
        /// Configuration key.
        key: String,
    },

    /// The declared resource shape was rejected.
    #[error("resource '{resource}' rejected: {reason}")]
    ResourceDeclaration {
        /// Resource name.
        resource: String,
        /// Reason for rejection.
        reason: String,
    },

    /// Provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State storage failed.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Linode API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Linode authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Linode API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("Linode API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with Linode: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from Linode API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the state directory failed.
    #[error("State storage failed: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A request or settings file was not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A file could not be parsed.
    #[error("Failed to parse {location}: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Source location.
        location: String,
    },

    /// Environment variable has an unusable value.
    #[error("Invalid value for {name}: {message}")]
    InvalidValue {
        /// Name of the variable.
        name: String,
        /// Why it was rejected.
        message: String,
    },

    /// A secret needed by the stack has no configured source.
    #[error("Secret for '{key}' is not configured (set {env_var})")]
    MissingSecret {
        /// Stack configuration key.
        key: String,
        /// Environment variable the secret is read from.
        env_var: String,
    },

    /// The engine refused the configuration value.
    #[error("Failed to set configuration '{key}': {source}")]
    Rejected {
        /// Stack configuration key.
        key: String,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn invalid(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidSpecification {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Returns the failure kind reported to callers.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpecification { .. } => ErrorKind::InvalidSpecification,
            Self::PluginInstall { .. } => ErrorKind::PluginInstallError,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::Refresh { .. } => ErrorKind::RefreshError,
            Self::Apply {
                source: EngineError::ResourceDeclaration { .. },
                ..
            } => ErrorKind::ResourceDeclarationError,
            Self::Apply { .. } => ErrorKind::ApplyError,
            Self::Destroy { .. } => ErrorKind::DestroyError,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io(_) | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Returns true if the caller sent something unusable.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidSpecification | ErrorKind::ResourceDeclarationError
        )
    }

    /// Returns the engine failure behind this error, if there is one.
    #[must_use]
    pub const fn engine_cause(&self) -> Option<&EngineError> {
        match self {
            Self::PluginInstall { source, .. }
            | Self::Refresh { source, .. }
            | Self::Apply { source, .. }
            | Self::Destroy { source, .. }
            | Self::Configuration(ConfigError::Rejected { source, .. }) => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    /// Returns true if the failure means the stack does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::StackNotFound { .. })
    }

    /// Returns true if the provider answered and refused the request, so it
    /// changed nothing.
    #[must_use]
    pub const fn is_rejected_by_provider(&self) -> bool {
        match self {
            Self::Provider(
                ProviderError::AuthenticationFailed { .. } | ProviderError::RateLimited { .. },
            ) => true,
            Self::Provider(ProviderError::ApiRequestFailed { status, .. }) => *status < 500,
            _ => false,
        }
    }

    /// Creates a declaration rejection.
    #[must_use]
    pub fn declaration(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceDeclaration {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorKind {
    /// Returns the stable name used in response bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSpecification => "InvalidSpecification",
            Self::PluginInstallError => "PluginInstallError",
            Self::ConfigurationError => "ConfigurationError",
            Self::RefreshError => "RefreshError",
            Self::ApplyError => "ApplyError",
            Self::DestroyError => "DestroyError",
            Self::ResourceDeclarationError => "ResourceDeclarationError",
            Self::Cancelled => "Cancelled",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if a read may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkError { .. })
    }
}
