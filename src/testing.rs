//! Shared test fixtures.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{Intent, RequestInput, StackDetailsInput, VmOptionsInput};
use crate::engine::{CreatedResource, InstanceOutputs, ProviderConfig, ProviderPlugin};
use crate::error::EngineResult;
use crate::program::{InstanceArgs, InstanceInputs};

/// A valid create request for `carlos` on Ubuntu 18.04.
pub fn sample_input() -> RequestInput {
    RequestInput {
        requester_username: String::from("carlos"),
        intent: Some(Intent::Create),
        vm_options: VmOptionsInput {
            image_name: String::from("linode/ubuntu18.04"),
            operating_system: String::from("ubuntu18.04"),
            label_name: String::from("carlos-dev"),
            private_ip: false,
            region_name: String::from("us-east"),
            password: String::from("correct-horse-battery"),
            vm_type: String::from("g6-nanode-1"),
            swap_size: 512,
        },
        stack_details: StackDetailsInput {
            username: String::from("carlos"),
            project_name: String::from("slack-vms"),
            instance_name: String::from("carlos-vm"),
        },
    }
}

/// The JSON wire form of [`sample_input`], with the given intent.
pub fn sample_json(intent: &str) -> String {
    serde_json::json!({
        "requesterUsername": "carlos",
        "intent": intent,
        "vmOptions": {
            "imageName": "linode/ubuntu18.04",
            "operatingSystem": "ubuntu18.04",
            "labelName": "carlos-dev",
            "regionName": "us-east",
            "password": "correct-horse-battery",
            "type": "g6-nanode-1",
            "swapSize": 512
        },
        "stackDetails": {
            "username": "carlos",
            "projectName": "slack-vms",
            "instanceName": "carlos-vm"
        }
    })
    .to_string()
}

/// A Linode plugin whose creates never answer, as if the response was lost
/// after the provider accepted the request. Lookups find the instance the
/// lost create made.
#[derive(Debug, Clone, Default)]
pub struct StalledCreatePlugin {
    /// Creates sent.
    pub creates: Arc<AtomicUsize>,
    /// Lookups made.
    pub finds: Arc<AtomicUsize>,
}

impl StalledCreatePlugin {
    /// Outputs of the instance the lost create made.
    pub fn outputs() -> InstanceOutputs {
        InstanceOutputs {
            status: String::from("running"),
            ipv4: vec![String::from("192.0.2.10")],
            ipv6: None,
        }
    }
}

#[async_trait]
impl ProviderPlugin for StalledCreatePlugin {
    fn name(&self) -> &'static str {
        "linode"
    }

    fn version(&self) -> &'static str {
        "v3.7.1"
    }

    fn required_config(&self) -> &'static [&'static str] {
        &["token"]
    }

    async fn read(&self, _: &ProviderConfig, _: &str) -> EngineResult<Option<InstanceOutputs>> {
        Ok(Some(Self::outputs()))
    }

    async fn create(&self, _: &ProviderConfig, _: &InstanceArgs) -> EngineResult<CreatedResource> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn update(
        &self,
        _: &ProviderConfig,
        _: &str,
        _: &InstanceInputs,
    ) -> EngineResult<InstanceOutputs> {
        Ok(Self::outputs())
    }

    async fn delete(&self, _: &ProviderConfig, _: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn find(
        &self,
        _: &ProviderConfig,
        _: &InstanceInputs,
    ) -> EngineResult<Option<CreatedResource>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let created = self.creates.load(Ordering::SeqCst) > 0;
        Ok(created.then(|| CreatedResource {
            id: String::from("1001"),
            outputs: Self::outputs(),
        }))
    }
}
