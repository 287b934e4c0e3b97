//! Linode API types.
//!
//! Only the fields this crate reads or sends are modelled.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::engine::InstanceOutputs;
use crate::program::{InstanceArgs, InstanceInputs};

/// A Linode instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// Instance identifier.
    pub id: u64,
    /// Display label.
    pub label: String,
    /// Current status.
    #[serde(default)]
    pub status: InstanceStatus,
    /// Image the instance was deployed from.
    #[serde(default)]
    pub image: Option<String>,
    /// Region identifier.
    #[serde(default)]
    pub region: String,
    /// Instance type.
    #[serde(rename = "type", default)]
    pub instance_type: String,
    /// IPv4 addresses.
    #[serde(default)]
    pub ipv4: Vec<String>,
    /// IPv6 SLAAC address.
    #[serde(default)]
    pub ipv6: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Instance status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is running.
    Running,
    /// Instance is shut down.
    Offline,
    /// Instance is booting.
    Booting,
    /// Instance is rebooting.
    Rebooting,
    /// Instance is shutting down.
    ShuttingDown,
    /// Instance is being provisioned.
    Provisioning,
    /// Instance is being deleted.
    DeletingLinode,
    /// Instance is migrating.
    Migrating,
    /// Instance is being rebuilt.
    Rebuilding,
    /// Instance is being cloned.
    Cloning,
    /// Instance is being restored.
    Restoring,
    /// Instance is stopped.
    Stopped,
    /// Any status this crate does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Request to create an instance.
#[derive(Debug, Serialize)]
pub struct CreateInstanceRequest {
    /// Image identifier.
    pub image: String,
    /// Display label.
    pub label: String,
    /// Whether to allocate a private IP.
    pub private_ip: bool,
    /// Region identifier.
    pub region: String,
    /// Root password.
    #[serde(serialize_with = "expose_secret")]
    pub root_pass: SecretString,
    /// Instance type.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Swap size in MB.
    pub swap_size: i16,
    /// Tags.
    pub tags: Vec<String>,
}

/// Request to update the mutable fields of an instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpdateInstanceRequest {
    /// Display label.
    pub label: String,
    /// Tags.
    pub tags: Vec<String>,
}

/// One page of a collection. Only the first page is read.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Linode error envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

/// One Linode API error.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub reason: String,
    #[serde(default)]
    pub field: Option<String>,
}

fn expose_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl Instance {
    /// Outputs recorded in the stack state.
    #[must_use]
    pub fn outputs(&self) -> InstanceOutputs {
        InstanceOutputs {
            status: self.status.to_string(),
            ipv4: self.ipv4.clone(),
            ipv6: self.ipv6.clone(),
        }
    }
}

impl From<&InstanceArgs> for CreateInstanceRequest {
    fn from(args: &InstanceArgs) -> Self {
        let inputs = &args.inputs;
        Self {
            image: inputs.image.clone(),
            label: inputs.label.clone(),
            private_ip: inputs.private_ip,
            region: inputs.region.clone(),
            root_pass: SecretString::from(args.root_pass.expose_secret().to_owned()),
            instance_type: inputs.instance_type.clone(),
            swap_size: inputs.swap_size,
            tags: inputs.tags.clone(),
        }
    }
}

impl From<&InstanceInputs> for UpdateInstanceRequest {
    fn from(inputs: &InstanceInputs) -> Self {
        Self {
            label: inputs.label.clone(),
            tags: inputs.tags.clone(),
        }
    }
}

impl ErrorResponse {
    /// Joins every error into one message.
    pub(crate) fn message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| match &e.field {
                    Some(field) => format!("{field}: {}", e.reason),
                    None => e.reason.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Running => "running",
            Self::Offline => "offline",
            Self::Booting => "booting",
            Self::Rebooting => "rebooting",
            Self::ShuttingDown => "shutting_down",
            Self::Provisioning => "provisioning",
            Self::DeletingLinode => "deleting_linode",
            Self::Migrating => "migrating",
            Self::Rebuilding => "rebuilding",
            Self::Cloning => "cloning",
            Self::Restoring => "restoring",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        write!(f, "{status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance() {
        let json = r#"{
            "id": 123,
            "label": "carlos-dev",
            "status": "running",
            "image": "linode/ubuntu18.04",
            "region": "us-east",
            "type": "g6-nanode-1",
            "ipv4": ["192.0.2.10"],
            "ipv6": "2600:3c03::f03c:91ff:fe24:3a2f/128",
            "tags": ["slack-bot", "carlos"],
            "hypervisor": "kvm"
        }"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.id, 123);
        assert_eq!(instance.outputs().status, "running");
        assert_eq!(instance.outputs().ipv4, vec!["192.0.2.10"]);
    }

    #[test]
    fn test_unknown_status() {
        let instance: Instance =
            serde_json::from_str(r#"{"id": 1, "label": "x", "status": "resizing"}"#).unwrap();
        assert_eq!(instance.status, InstanceStatus::Unknown);
    }

    #[test]
    fn test_create_request_wire_shape() {
        let request = CreateInstanceRequest {
            image: String::from("linode/ubuntu18.04"),
            label: String::from("carlos-dev"),
            private_ip: false,
            region: String::from("us-east"),
            root_pass: SecretString::from("correct-horse-battery"),
            instance_type: String::from("g6-nanode-1"),
            swap_size: 512,
            tags: vec![String::from("slack-bot")],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["root_pass"], "correct-horse-battery");
        assert_eq!(value["type"], "g6-nanode-1");
        assert!(!format!("{request:?}").contains("correct-horse-battery"));
    }

    #[test]
    fn test_error_message_joins_reasons() {
        let body: ErrorResponse = serde_json::from_str(
            r#"{"errors": [{"reason": "Invalid region", "field": "region"}, {"reason": "Try again"}]}"#,
        )
        .unwrap();
        assert_eq!(body.message().unwrap(), "region: Invalid region; Try again");
    }
}
