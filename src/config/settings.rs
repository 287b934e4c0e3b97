//! Process-wide settings.
//!
//! Settings are read from the environment once, at process start, and handed
//! to the orchestrator explicitly. Nothing below this module reads the
//! environment.

use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StackError};

/// Environment variable holding the Linode API token.
pub const TOKEN_ENV: &str = "LINODE_TOKEN";

/// Environment variable overriding the workspace directory.
pub const WORKSPACE_ENV: &str = "VMSTACK_WORKSPACE";

/// Environment variable overriding the HTTP listen address.
pub const LISTEN_ADDR_ENV: &str = "VMSTACK_LISTEN_ADDR";

/// Environment variable overriding the per-run timeout, in seconds.
pub const RUN_TIMEOUT_ENV: &str = "VMSTACK_RUN_TIMEOUT_SECS";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 1800;
const WORKSPACE_DIR_NAME: &str = "vmstack";

/// Settings shared by every run in the process.
#[derive(Debug)]
pub struct Settings {
    /// Provider API token; read-only after load.
    provider_token: Option<SecretString>,
    /// Directory holding stack state and the plugin cache.
    pub workspace_dir: PathBuf,
    /// Address the HTTP adapter binds.
    pub listen_addr: SocketAddr,
    /// Deadline applied to each run, if any.
    pub run_timeout: Option<Duration>,
}

impl Settings {
    /// Creates settings with defaults and no provider token.
    #[must_use]
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider_token: None,
            workspace_dir: workspace_dir.into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            run_timeout: Some(Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS)),
        }
    }

    /// Sets the provider token.
    #[must_use]
    pub fn with_provider_token(mut self, token: SecretString) -> Self {
        self.provider_token = Some(token);
        self
    }

    /// Sets the per-run timeout.
    #[must_use]
    pub const fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Returns the provider token, if one was configured.
    #[must_use]
    pub const fn provider_token(&self) -> Option<&SecretString> {
        self.provider_token.as_ref()
    }

    /// Loads the .env file from `base` (or the current directory) if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(base: Option<&Path>) -> Result<()> {
        let env_path = base.map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StackError::Configuration(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: env_path.display().to_string(),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads settings from the process environment.
    ///
    /// A missing token is not an error here; runs that need it fail with a
    /// configuration error when the secret is injected.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider_token = lookup(TOKEN_ENV)
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let workspace_dir = lookup(WORKSPACE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_workspace_dir);

        let listen_addr = lookup(LISTEN_ADDR_ENV)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid(LISTEN_ADDR_ENV, e))?;

        let run_timeout = match lookup(RUN_TIMEOUT_ENV) {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| invalid(RUN_TIMEOUT_ENV, e))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS)),
        };

        if provider_token.is_none() {
            debug!("{TOKEN_ENV} is not set");
        }

        Ok(Self {
            provider_token,
            workspace_dir,
            listen_addr,
            run_timeout,
        })
    }
}

fn invalid(name: &str, err: impl std::fmt::Display) -> StackError {
    StackError::Configuration(ConfigError::InvalidValue {
        name: name.to_string(),
        message: err.to_string(),
    })
}

fn default_workspace_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from(".vmstack"),
        |dir| dir.join(WORKSPACE_DIR_NAME),
    )
}
