//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// vmstack - one Linode VM per requester, managed as a stack.
#[derive(Parser, Debug)]
#[command(name = "vmstack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace directory for stack state and plugins.
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the VM described by a request file, or update it.
    Up {
        /// Request file (YAML or JSON).
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Destroy the VM described by a request file.
    Destroy {
        /// Request file (YAML or JSON).
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Print the stack name a request would use.
    StackName {
        /// Deploying identity.
        #[arg(long)]
        identity: String,

        /// Operating-system tag.
        #[arg(long)]
        os: String,

        /// Date to resolve for (YYYY-MM-DD, defaults to today).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Serve the HTTP entry point.
    Serve {
        /// Address to bind.
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Answer JSON requests read line by line from stdin.
    Queue,

    /// Show the recorded state of a stack.
    Show {
        /// Stack name.
        #[arg(long)]
        stack: String,

        /// Project name.
        #[arg(long)]
        project: String,
    },

    /// List plugins installed in the workspace.
    Plugins,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
