//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::action::{ActionOutcome, Executable};
use crate::planner::{DeploymentPlan, PlanResult, QueuedDeployment};
use crate::state::DeploymentState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Change")]
    change: String,
}

/// Action result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Queue entry row for table display.
#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Queued")]
    queued_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan) -> String {
        if plan.is_empty() {
            return format!("{} Nothing to deploy for {}.\n", "✓".green(), plan.name);
        }

        let mut output = format!("\nDeployment plan for {}\n\n", plan.name.bold());

        let rows: Vec<PlanActionRow> = plan
            .actions()
            .iter()
            .enumerate()
            .map(|(i, planned)| PlanActionRow {
                index: i + 1,
                kind: planned.action.kind().to_string(),
                resource: Self::truncate(&planned.action.info().identifier, 48),
                change: Self::format_change(planned.state.as_ref()),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let unchanged = plan.actions().iter().filter(|p| p.is_unchanged()).count();
        let _ = write!(
            output,
            "\nPlan: {} action(s), {} unchanged\n",
            plan.actions().len().to_string().green(),
            unchanged.to_string().dimmed()
        );
        output
    }

    /// Formats the results of an executed plan.
    #[must_use]
    pub fn format_result(&self, result: &PlanResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<ResultRow> = result
                    .results
                    .iter()
                    .map(|r| ResultRow {
                        resource: Self::truncate(&r.identifier, 48),
                        operation: r.operation.to_string(),
                        outcome: Self::format_outcome(&r.outcome),
                    })
                    .collect();

                let mut output = format!("\n{}\n", Table::new(rows));
                let _ = writeln!(
                    output,
                    "\n{} {}: {} change(s)",
                    "✓".green(),
                    result.name,
                    result.changed_count()
                );
                output
            }
        }
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\nState: {}\n\n", state.key.bold());
                let _ = writeln!(output, "   Operation: {}", state.operation);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Signature: {}",
                    &state.signature[..12.min(state.signature.len())]
                );
                let _ = writeln!(output, "   Origin: {}", state.origin);
                if let Some(timestamp) = state.timestamp {
                    let _ = writeln!(
                        output,
                        "   Deployed: {}",
                        timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                if let Some(last) = &state.last_version {
                    let _ = writeln!(output, "   Previous version: {last}");
                }
                if let Some(stderr) = state.stderr.as_deref().filter(|s| !s.is_empty()) {
                    let _ = writeln!(output, "   Last error output: {}", stderr.trim().yellow());
                }
                output
            }
        }
    }

    /// Formats queued deployments.
    #[must_use]
    pub fn format_queue(&self, entries: &[QueuedDeployment]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(entries).unwrap_or_default(),
            OutputFormat::Text => {
                if entries.is_empty() {
                    return String::from("   Queue is empty.\n");
                }
                let rows: Vec<QueueRow> = entries
                    .iter()
                    .map(|e| QueueRow {
                        key: e.deployment_key.clone(),
                        image: Self::truncate(&e.docker_image_url, 40),
                        version: e.semantic_version.clone(),
                        queued_at: e.queued_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, level: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": level.as_str(), "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => match level {
                MessageLevel::Success => format!("{} {message}", "✓".green()),
                MessageLevel::Warning => format!("{} {message}", "⚠".yellow()),
                MessageLevel::Error => format!("{} {message}", "✗".red()),
            },
        }
    }

    fn format_change(state: Option<&DeploymentState>) -> String {
        match state {
            None => "-".dimmed().to_string(),
            Some(s) if s.new => "+new".green().to_string(),
            Some(s) if s.modified => "~modified".yellow().to_string(),
            Some(_) => "unchanged".dimmed().to_string(),
        }
    }

    fn format_outcome(outcome: &ActionOutcome) -> String {
        match outcome {
            ActionOutcome::Executed => "executed".green().to_string(),
            ActionOutcome::Unchanged => "unchanged".dimmed().to_string(),
            ActionOutcome::DryRun { path: Some(path) } => format!("dry run -> {}", path.display()),
            ActionOutcome::DryRun { path: None } => String::from("dry run"),
            ActionOutcome::Skipped => "skipped".dimmed().to_string(),
            ActionOutcome::Tolerated { code, .. } => {
                format!("tolerated (exit {code})").yellow().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{kept}...")
        }
    }
}

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// The command succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// The command failed.
    Error,
}

impl MessageLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanJson {
    name: String,
    created_at: String,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionJson {
    kind: &'static str,
    identifier: String,
    operation: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<bool>,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            name: plan.name.clone(),
            created_at: plan.created_at.to_rfc3339(),
            actions: plan
                .actions()
                .iter()
                .map(|planned| ActionJson {
                    kind: planned.action.kind(),
                    identifier: planned.action.info().identifier.clone(),
                    operation: planned.action.info().operation.to_string(),
                    description: planned.action.plan_string(),
                    modified: planned.state.as_ref().map(|s| s.modified),
                })
                .collect(),
        }
    }
}
