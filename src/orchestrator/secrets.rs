//! Provider credential injection.

use std::sync::Arc;
use tracing::debug;

use crate::config::{Settings, TOKEN_ENV};
use crate::engine::{ConfigValue, Engine, StackKey};
use crate::error::{ConfigError, Result};
use crate::linode::TOKEN_CONFIG_KEY;

/// Copies the provider token from the settings into a stack's config.
#[derive(Debug, Clone)]
pub struct SecretInjector {
    settings: Arc<Settings>,
}

impl SecretInjector {
    /// Creates an injector reading from `settings`.
    #[must_use]
    pub const fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Sets the token as a secret config value on the stack.
    ///
    /// # Errors
    ///
    /// Returns `MissingSecret` if no token was configured and `Rejected` if
    /// the engine refuses the value.
    pub async fn inject(&self, engine: &dyn Engine, key: &StackKey) -> Result<()> {
        let token = self
            .settings
            .provider_token()
            .ok_or_else(|| ConfigError::MissingSecret {
                key: TOKEN_CONFIG_KEY.to_string(),
                env_var: TOKEN_ENV.to_string(),
            })?;

        engine
            .set_config(key, TOKEN_CONFIG_KEY, ConfigValue::secret(token))
            .await
            .map_err(|source| ConfigError::Rejected {
                key: TOKEN_CONFIG_KEY.to_string(),
                source,
            })?;
        debug!("Set {} on {}", TOKEN_CONFIG_KEY, key);
        Ok(())
    }
}
