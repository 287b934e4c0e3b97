//! The deployment program.
//!
//! A program is a callback the engine runs to learn the desired resources of a
//! stack. It only declares state; it never talks to the provider itself, so
//! running it any number of times with the same specification declares the
//! same resources.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::VmSpec;
use crate::error::{EngineError, EngineResult};
use crate::linode::PLUGIN_NAME;

/// Tag put on every instance this system creates.
pub const SYSTEM_TAG: &str = "slack-bot";

/// Resource type token of a Linode instance.
pub const INSTANCE_KIND: &str = "linode:index/instance:Instance";

/// Non-secret inputs of an instance. These are what the stack state records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceInputs {
    /// Image identifier.
    pub image: String,
    /// Display label.
    pub label: String,
    /// Private IP flag.
    pub private_ip: bool,
    /// Region identifier.
    pub region: String,
    /// Instance type.
    pub instance_type: String,
    /// Swap size.
    pub swap_size: i16,
    /// Tags, in declaration order.
    pub tags: Vec<String>,
}

/// Full inputs of an instance, including the root credential.
#[derive(Debug)]
pub struct InstanceArgs {
    /// Recorded inputs.
    pub inputs: InstanceInputs,
    /// Root credential, only ever handed to the provider.
    pub root_pass: SecretString,
}

/// One declared resource.
#[derive(Debug, PartialEq)]
pub struct ResourceDeclaration {
    /// Resource name, unique within the stack.
    pub name: String,
    /// Plugin that manages the resource.
    pub provider: String,
    /// Resource type token.
    pub kind: String,
    /// Resource inputs.
    pub args: InstanceArgs,
}

/// Collects declarations while a program runs.
#[derive(Debug, Default)]
pub struct ProgramContext {
    resources: Vec<ResourceDeclaration>,
}

type ProgramFn = dyn Fn(&mut ProgramContext) -> EngineResult<()> + Send + Sync;

/// A declarative program the engine can run.
#[derive(Clone)]
pub struct DeploymentProgram {
    run: Arc<ProgramFn>,
}

impl PartialEq for InstanceArgs {
    fn eq(&self, other: &Self) -> bool {
        self.inputs == other.inputs
            && self.root_pass.expose_secret() == other.root_pass.expose_secret()
    }
}

impl InstanceArgs {
    /// Builds the instance inputs for a specification.
    #[must_use]
    pub fn from_spec(spec: &VmSpec) -> Self {
        let mut seen = BTreeSet::new();
        let tags = [SYSTEM_TAG, spec.identity.as_str()]
            .into_iter()
            .filter(|tag| seen.insert(*tag))
            .map(String::from)
            .collect();

        Self {
            inputs: InstanceInputs {
                image: spec.image.clone(),
                label: spec.label.clone(),
                private_ip: spec.private_ip,
                region: spec.region.clone(),
                instance_type: spec.instance_type.clone(),
                swap_size: spec.swap_size,
                tags,
            },
            root_pass: spec.root_pass(),
        }
    }
}

impl ProgramContext {
    /// Declares a Linode instance.
    ///
    /// # Errors
    ///
    /// Returns a declaration error if the name is empty or already taken.
    pub fn register_instance(&mut self, name: &str, args: InstanceArgs) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::declaration(name, "resource name cannot be empty"));
        }
        if self.resources.iter().any(|r| r.name == name) {
            return Err(EngineError::declaration(
                name,
                "a resource with this name is already declared",
            ));
        }

        self.resources.push(ResourceDeclaration {
            name: name.to_string(),
            provider: PLUGIN_NAME.to_string(),
            kind: INSTANCE_KIND.to_string(),
            args,
        });
        Ok(())
    }

    /// Consumes the context, returning what was declared.
    #[must_use]
    pub fn into_declarations(self) -> Vec<ResourceDeclaration> {
        self.resources
    }
}

impl DeploymentProgram {
    /// Wraps a callback as a program.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&mut ProgramContext) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }

    /// The program for a VM specification: exactly one instance.
    #[must_use]
    pub fn for_spec(spec: Arc<VmSpec>) -> Self {
        Self::new(move |ctx| ctx.register_instance(&spec.instance_name, InstanceArgs::from_spec(&spec)))
    }

    /// Runs the program and returns the declared resources.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error raised by the program.
    pub fn declare(&self) -> EngineResult<Vec<ResourceDeclaration>> {
        let mut ctx = ProgramContext::default();
        (self.run)(&mut ctx)?;
        Ok(ctx.into_declarations())
    }
}

impl std::fmt::Debug for DeploymentProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentProgram").finish_non_exhaustive()
    }
}
