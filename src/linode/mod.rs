//! Linode provider.
//!
//! This module provides the Linode REST client and the provider plugin the
//! engine uses to manage instances.

mod client;
mod provider;
mod types;

pub use client::{LINODE_API_URL, LinodeClient, http_client};
pub use provider::LinodeProvider;
pub use types::{CreateInstanceRequest, Instance, InstanceStatus, Page, UpdateInstanceRequest};

/// Plugin name the deployment program's resources belong to.
pub const PLUGIN_NAME: &str = "linode";

/// Plugin version the orchestrator pins.
pub const PLUGIN_VERSION: &str = "v3.7.1";

/// Provider configuration key holding the API token.
pub const TOKEN_CONFIG_KEY: &str = "linode:token";
