//! CLI module for the vmstack tool.
//!
//! This module provides the command-line interface for creating and
//! destroying VM stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
