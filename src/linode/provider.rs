//! Linode provider plugin.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;
use std::time::Duration;
use tracing::info;

use crate::engine::{CreatedResource, InstanceOutputs, ProviderConfig, ProviderPlugin};
use crate::error::EngineResult;
use crate::program::{InstanceArgs, InstanceInputs};

use super::client::{LINODE_API_URL, LinodeClient, http_client};
use super::types::{CreateInstanceRequest, UpdateInstanceRequest};
use super::{PLUGIN_NAME, PLUGIN_VERSION};

const REQUIRED_CONFIG: &[&str] = &["token"];

/// Manages Linode instances for the engine.
#[derive(Debug, Clone)]
pub struct LinodeProvider {
    http: Client,
    base_url: String,
    retry_delay: Option<Duration>,
}

impl LinodeProvider {
    /// Creates a provider against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: LINODE_API_URL.to_string(),
            retry_delay: None,
        })
    }

    /// Points the provider at another API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the delay between read retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    fn client(&self, config: &ProviderConfig) -> EngineResult<LinodeClient> {
        let token = SecretString::from(config.require("token")?.expose().to_owned());
        let client = LinodeClient::with_client(self.http.clone(), &self.base_url, token);
        Ok(match self.retry_delay {
            Some(delay) => client.with_retry_delay(delay),
            None => client,
        })
    }
}

#[async_trait]
impl ProviderPlugin for LinodeProvider {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn version(&self) -> &'static str {
        PLUGIN_VERSION
    }

    fn required_config(&self) -> &'static [&'static str] {
        REQUIRED_CONFIG
    }

    async fn read(&self, config: &ProviderConfig, id: &str) -> EngineResult<Option<InstanceOutputs>> {
        let instance = self.client(config)?.get_instance(id).await?;
        Ok(instance.map(|i| i.outputs()))
    }

    async fn create(
        &self,
        config: &ProviderConfig,
        args: &InstanceArgs,
    ) -> EngineResult<CreatedResource> {
        let instance = self
            .client(config)?
            .create_instance(&CreateInstanceRequest::from(args))
            .await?;
        info!("Created Linode instance {} ({})", instance.id, instance.label);

        Ok(CreatedResource {
            id: instance.id.to_string(),
            outputs: instance.outputs(),
        })
    }

    async fn update(
        &self,
        config: &ProviderConfig,
        id: &str,
        inputs: &InstanceInputs,
    ) -> EngineResult<InstanceOutputs> {
        let instance = self
            .client(config)?
            .update_instance(id, &UpdateInstanceRequest::from(inputs))
            .await?;
        Ok(instance.outputs())
    }

    async fn delete(&self, config: &ProviderConfig, id: &str) -> EngineResult<()> {
        self.client(config)?.delete_instance(id).await?;
        info!("Deleted Linode instance {id}");
        Ok(())
    }

    async fn find(
        &self,
        config: &ProviderConfig,
        inputs: &InstanceInputs,
    ) -> EngineResult<Option<CreatedResource>> {
        let found = self
            .client(config)?
            .find_instance_by_label(&inputs.label)
            .await?
            // Same label but not ours
            .filter(|instance| inputs.tags.iter().all(|tag| instance.tags.contains(tag)));

        Ok(found.map(|instance| {
            info!("Found Linode instance {} ({})", instance.id, instance.label);
            CreatedResource {
                id: instance.id.to_string(),
                outputs: instance.outputs(),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecValidator;
    use crate::engine::{ConfigValue, Engine, LocalEngine, PluginRegistry, StackKey};
    use crate::error::{EngineError, ProviderError};
    use crate::linode::TOKEN_CONFIG_KEY;
    use crate::program::DeploymentProgram;
    use crate::testing::sample_input;
    use std::sync::Arc;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> LinodeProvider {
        LinodeProvider::new()
            .unwrap()
            .with_base_url(server.uri())
            .with_retry_delay(Duration::ZERO)
    }

    fn config() -> ProviderConfig {
        let mut config = ProviderConfig::new(PLUGIN_NAME);
        config.insert("token", ConfigValue::secret(&SecretString::from("tok-123")));
        config
    }

    #[tokio::test]
    async fn test_read_maps_missing_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/linode/instances/7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(provider(&server).read(&config(), "7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requires_token() {
        let server = MockServer::start().await;
        let err = provider(&server)
            .read(&ProviderConfig::new(PLUGIN_NAME), "7")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingConfig { .. }));
    }

    #[tokio::test]
    async fn test_engine_deploys_through_the_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/linode/instances"))
            .and(bearer_token("tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 4242,
                "label": "carlos-dev",
                "status": "provisioning",
                "ipv4": ["192.0.2.44"],
                "tags": ["slack-bot", "carlos"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/linode/instances/4242"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let registry = PluginRegistry::new().with(Arc::new(provider(&server)));
        let engine = LocalEngine::new(dir.path(), registry);
        let key = StackKey::new("carlos-ubuntu18.04-01-02-2024", "slack-vms");
        let spec = SpecValidator::new().validate(&sample_input()).unwrap().spec;

        engine.install_plugin(PLUGIN_NAME, PLUGIN_VERSION).await.unwrap();
        engine.upsert_stack(&key).await.unwrap();
        engine
            .set_config(
                &key,
                TOKEN_CONFIG_KEY,
                ConfigValue::secret(&SecretString::from("tok-123")),
            )
            .await
            .unwrap();
        engine.refresh(&key).await.unwrap();

        let summary = engine.up(&key, &DeploymentProgram::for_spec(spec)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.resources["carlos-vm"].id, "4242");
        assert_eq!(summary.resources["carlos-vm"].outputs.ipv4, vec!["192.0.2.44"]);

        let summary = engine.destroy(&key).await.unwrap();
        assert_eq!(summary.deleted, 1);
    }

    #[tokio::test]
    async fn test_find_only_adopts_instances_carrying_our_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/linode/instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "id": 4242,
                    "label": "carlos-dev",
                    "status": "running",
                    "ipv4": ["192.0.2.44"],
                    "tags": ["slack-bot", "carlos"]
                }]
            })))
            .mount(&server)
            .await;

        let spec = SpecValidator::new().validate(&sample_input()).unwrap().spec;
        let mut inputs = InstanceArgs::from_spec(&spec).inputs;
        let found = provider(&server).find(&config(), &inputs).await.unwrap().unwrap();
        assert_eq!(found.id, "4242");
        assert_eq!(found.outputs.status, "running");

        inputs.tags.push(String::from("dana"));
        assert!(provider(&server).find(&config(), &inputs).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_surfaces_as_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let spec = SpecValidator::new().validate(&sample_input()).unwrap().spec;
        let args = InstanceArgs::from_spec(&spec);
        let err = provider(&server).create(&config(), &args).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Provider(ProviderError::AuthenticationFailed { .. })
        ));
    }
}
