// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # vmstack
//!
//! Provisions and tears down one Linode VM per requester, managed as a
//! persisted infrastructure stack.
//!
//! ## Overview
//!
//! A request names a requester, a create or destroy intent, VM options and
//! stack details. vmstack:
//!
//! - Validates the request into a VM specification
//! - Resolves the stack name `{identity}-{os}-{MM-DD-YYYY}`
//! - Installs the pinned Linode provider plugin
//! - Injects the provider token from process settings as a secret
//! - Refreshes the stack, then applies or destroys it
//!
//! ## Architecture
//!
//! Every run follows the same state machine:
//!
//! 1. **Resolving**: validate, name and select (or create) the stack
//! 2. **PluginReady**: the provider plugin is installed
//! 3. **Configured**: the provider token is set
//! 4. **Refreshed**: recorded state matches the provider
//! 5. **Applying / Destroying**: the stack converges or is emptied
//!
//! Any failure stops the run in `Failed` with its cause.
//!
//! ## Modules
//!
//! - [`config`]: Request parsing, validation and process settings
//! - [`identity`]: Stack name resolution
//! - [`program`]: The deployment program declaring the instance
//! - [`engine`]: The stack engine, its state store and plugins
//! - [`linode`]: Linode API client and provider plugin
//! - [`orchestrator`]: The lifecycle state machine
//! - [`adapters`]: HTTP and queue entry points, response envelope
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! requesterUsername: carlos
//! intent: create
//! vmOptions:
//!   imageName: linode/ubuntu18.04
//!   operatingSystem: ubuntu18.04
//!   labelName: carlos-dev
//!   regionName: us-east
//!   password: correct-horse-battery
//!   type: g6-nanode-1
//!   swapSize: 512
//! stackDetails:
//!   username: carlos
//!   projectName: slack-vms
//!   instanceName: carlos-vm
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod adapters;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod linode;
pub mod orchestrator;
pub mod program;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapters::Response;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Intent, RequestInput, RequestParser, Settings, SpecValidator, VmRequest, VmSpec};
pub use engine::{Engine, LocalEngine, StackKey, UpdateSummary};
pub use error::{ErrorKind, Result, StackError};
pub use identity::StackName;
pub use linode::LinodeProvider;
pub use orchestrator::{CancelSignal, LifecyclePhase, Orchestrator, RunReport};
pub use program::DeploymentProgram;
