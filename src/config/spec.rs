//! Request and specification types.
//!
//! [`RequestInput`] mirrors the wire format received from entry points. It is
//! turned into an immutable [`VmRequest`] by the validator; downstream
//! components only ever see the validated form.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// What the caller wants done to the stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Select or create the stack and apply the program.
    Create,
    /// Select an existing stack and remove its resources.
    Destroy,
}

/// Raw request as received from an entry point.
#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    /// Who asked for the VM.
    #[validate(length(min = 1, message = "requester username cannot be empty"))]
    pub requester_username: String,
    /// Explicit create-or-destroy intent.
    #[serde(default)]
    pub intent: Option<Intent>,
    /// Instance options.
    #[validate(nested)]
    pub vm_options: VmOptionsInput,
    /// Stack placement.
    #[serde(alias = "pulumiDetails")]
    #[validate(nested)]
    pub stack_details: StackDetailsInput,
}

/// Raw instance options.
#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VmOptionsInput {
    /// Provider image identifier, e.g. `linode/ubuntu18.04`.
    #[validate(length(min = 1, message = "image name cannot be empty"))]
    pub image_name: String,
    /// Operating-system tag, e.g. `ubuntu18.04`.
    #[validate(length(min = 1, message = "operating system cannot be empty"))]
    pub operating_system: String,
    /// Display label of the instance.
    #[validate(length(min = 1, message = "label cannot be empty"))]
    pub label_name: String,
    /// Whether to allocate a private IP.
    #[serde(default)]
    pub private_ip: bool,
    /// Region identifier, e.g. `us-east`.
    #[validate(length(min = 1, message = "region cannot be empty"))]
    pub region_name: String,
    /// Root password.
    #[validate(length(min = 1, message = "root password cannot be empty"))]
    pub password: String,
    /// Instance type, e.g. `g6-nanode-1`.
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "instance type cannot be empty"))]
    pub vm_type: String,
    /// Swap size.
    #[serde(default = "default_swap_size")]
    #[validate(range(min = 0, max = 32767, message = "swap size must be between 0 and 32767"))]
    pub swap_size: i64,
}

/// Raw stack placement details.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StackDetailsInput {
    /// Deploying identity; part of the stack name and the instance tags.
    #[validate(length(min = 1, message = "username cannot be empty"))]
    pub username: String,
    /// Project that owns the stack.
    #[validate(length(min = 1, message = "project name cannot be empty"))]
    pub project_name: String,
    /// Resource name of the instance inside the program.
    #[validate(length(min = 1, message = "instance name cannot be empty"))]
    pub instance_name: String,
}

/// Validated description of the desired instance.
#[derive(Debug)]
pub struct VmSpec {
    /// Provider image identifier.
    pub image: String,
    /// Operating-system tag.
    pub os_tag: String,
    /// Display label.
    pub label: String,
    /// Whether to allocate a private IP.
    pub private_ip: bool,
    /// Region identifier.
    pub region: String,
    /// Root credential. Never logged or echoed.
    pub root_pass: SecretString,
    /// Instance type.
    pub instance_type: String,
    /// Swap size.
    pub swap_size: i16,
    /// Who asked for the VM.
    pub requester: String,
    /// Deploying identity.
    pub identity: String,
    /// Owning project.
    pub project: String,
    /// Resource name of the instance.
    pub instance_name: String,
}

/// A validated request: the specification plus the resolved intent.
#[derive(Debug, Clone)]
pub struct VmRequest {
    /// What to do.
    pub intent: Intent,
    /// What to do it to.
    pub spec: Arc<VmSpec>,
}

/// Response-safe view of a specification, with the credential withheld.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecEcho {
    /// Requester.
    pub requester_username: String,
    /// Image.
    pub image_name: String,
    /// OS tag.
    pub operating_system: String,
    /// Label.
    pub label_name: String,
    /// Private IP flag.
    pub private_ip: bool,
    /// Region.
    pub region_name: String,
    /// Instance type.
    #[serde(rename = "type")]
    pub vm_type: String,
    /// Swap size.
    pub swap_size: i16,
    /// Deploying identity.
    pub username: String,
    /// Project.
    pub project_name: String,
    /// Instance resource name.
    pub instance_name: String,
}

const fn default_swap_size() -> i64 {
    512
}

impl std::fmt::Debug for RequestInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInput")
            .field("requester_username", &self.requester_username)
            .field("intent", &self.intent)
            .field("vm_options", &self.vm_options)
            .field("stack_details", &self.stack_details)
            .finish()
    }
}

impl std::fmt::Debug for VmOptionsInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmOptionsInput")
            .field("image_name", &self.image_name)
            .field("operating_system", &self.operating_system)
            .field("label_name", &self.label_name)
            .field("private_ip", &self.private_ip)
            .field("region_name", &self.region_name)
            .field("password", &"[REDACTED]")
            .field("vm_type", &self.vm_type)
            .field("swap_size", &self.swap_size)
            .finish()
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let intent = match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
        };
        write!(f, "{intent}")
    }
}

impl VmSpec {
    /// Returns the response-safe view of this specification.
    #[must_use]
    pub fn echo(&self) -> SpecEcho {
        SpecEcho {
            requester_username: self.requester.clone(),
            image_name: self.image.clone(),
            operating_system: self.os_tag.clone(),
            label_name: self.label.clone(),
            private_ip: self.private_ip,
            region_name: self.region.clone(),
            vm_type: self.instance_type.clone(),
            swap_size: self.swap_size,
            username: self.identity.clone(),
            project_name: self.project.clone(),
            instance_name: self.instance_name.clone(),
        }
    }

    /// Returns a copy of the root credential for handing to the provider.
    #[must_use]
    pub fn root_pass(&self) -> SecretString {
        SecretString::from(self.root_pass.expose_secret().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "requesterUsername": "carlos",
        "intent": "create",
        "vmOptions": {
            "imageName": "linode/ubuntu18.04",
            "operatingSystem": "ubuntu18.04",
            "labelName": "carlos-dev",
            "regionName": "us-east",
            "password": "hunter2hunter2",
            "type": "g6-nanode-1"
        },
        "pulumiDetails": {
            "username": "carlos",
            "projectName": "slack-vms",
            "instanceName": "carlos-vm"
        }
    }"#;

    #[test]
    fn test_parse_wire_format() {
        let input: RequestInput = serde_json::from_str(JSON).unwrap();
        assert_eq!(input.intent, Some(Intent::Create));
        assert_eq!(input.vm_options.swap_size, 512);
        assert!(!input.vm_options.private_ip);
        assert_eq!(input.stack_details.project_name, "slack-vms");
    }

    #[test]
    fn test_debug_hides_password() {
        let input: RequestInput = serde_json::from_str(JSON).unwrap();
        let debug = format!("{input:?}");
        assert!(!debug.contains("hunter2hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
