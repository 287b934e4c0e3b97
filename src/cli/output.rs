//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::adapters::Response;
use crate::engine::{InstalledPlugin, StackState, UpdateSummary};
use crate::identity::StackName;
use crate::orchestrator::RunReport;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "IPv4")]
    ipv4: String,
}

/// Plugin row for table display.
#[derive(Tabled)]
struct PluginRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Installed")]
    installed_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of a run.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&Response::from_report(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();
        let stack = report
            .stack
            .as_ref()
            .map_or_else(|| "(unresolved)".to_string(), ToString::to_string);
        let intent = report
            .intent
            .map_or_else(|| "run".to_string(), |i| i.to_string());

        let path = report
            .phases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");

        match &report.outcome {
            Ok(summary) => {
                let _ = writeln!(output, "{} {intent} of {stack} succeeded", "✓".green());
                let _ = writeln!(output, "   {path}\n");
                output.push_str(&Self::format_summary(summary));
            }
            Err(err) => {
                let _ = writeln!(output, "{} {intent} of {stack} failed", "✗".red());
                let _ = writeln!(output, "   {path}");
                let _ = writeln!(output, "   {}: {err}", err.kind().to_string().red());
            }
        }
        output
    }

    fn format_summary(summary: &UpdateSummary) -> String {
        let mut output = String::new();

        if !summary.resources.is_empty() {
            let rows: Vec<ResourceRow> = summary
                .resources
                .iter()
                .map(|(name, r)| ResourceRow {
                    name: name.clone(),
                    id: r.id.clone(),
                    status: r.outputs.status.clone(),
                    ipv4: r.outputs.ipv4.join(", "),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\n{}: {} created, {} updated, {} replaced, {} deleted, {} unchanged\n",
            summary.operation,
            summary.created.to_string().green(),
            summary.updated.to_string().yellow(),
            summary.replaced.to_string().yellow(),
            summary.deleted.to_string().red(),
            summary.unchanged
        );
        output
    }

    /// Formats a resolved stack name.
    #[must_use]
    pub fn format_stack_name(&self, name: &StackName) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({ "stackName": name }).to_string(),
            OutputFormat::Text => format!("{name}\n"),
        }
    }

    /// Formats recorded stack state.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => Self::format_state_text(state),
        }
    }

    fn format_state_text(state: &StackState) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nStack: {}/{}\n\n", state.project, state.stack);
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(
            output,
            "   Program hash: {}",
            &state.program_hash[..8.min(state.program_hash.len())]
        );
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        let _ = writeln!(output, "   Config keys: {}", state.config.len());

        if state.resources.is_empty() {
            output.push_str("\n   No resources.\n");
        } else {
            let rows: Vec<ResourceRow> = state
                .resources
                .values()
                .map(|r| ResourceRow {
                    name: r.name.clone(),
                    id: r.id.clone(),
                    status: r.outputs.status.clone(),
                    ipv4: r.outputs.ipv4.join(", "),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for pending in state.pending.values() {
            let _ = writeln!(
                output,
                "   {} create of {} ({}) unconfirmed since {}",
                "!".yellow(),
                pending.name,
                pending.inputs.label,
                pending.started_at.format("%Y-%m-%d %H:%M")
            );
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let status = if entry.success { "✓" } else { "✗" };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} ({})",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.resources.join(", ")
                );
            }
        }

        output
    }

    /// Formats the installed plugins.
    #[must_use]
    pub fn format_plugins(&self, plugins: &[InstalledPlugin]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plugins).unwrap_or_default(),
            OutputFormat::Text => {
                if plugins.is_empty() {
                    return "No plugins installed.\n".to_string();
                }
                let rows: Vec<PluginRow> = plugins
                    .iter()
                    .map(|p| PluginRow {
                        name: p.name.clone(),
                        version: p.version.clone(),
                        installed_at: p.installed_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }
}
