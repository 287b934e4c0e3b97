//! Request configuration and process settings.
//!
//! This module handles:
//! - Parsing requests from JSON and YAML
//! - Validating requests into immutable specifications
//! - Hashing declared inputs for change detection
//! - Loading process-wide settings from the environment

mod hash;
mod parser;
mod settings;
mod spec;
mod validator;

pub use hash::DeclarationHasher;
pub use parser::RequestParser;
pub use settings::{LISTEN_ADDR_ENV, RUN_TIMEOUT_ENV, Settings, TOKEN_ENV, WORKSPACE_ENV};
pub use spec::{
    Intent, RequestInput, SpecEcho, StackDetailsInput, VmOptionsInput, VmRequest, VmSpec,
};
pub use validator::SpecValidator;
