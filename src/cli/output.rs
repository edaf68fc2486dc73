//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; printing is left to the binary.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, StackConfig, ValidationResult};
use crate::deployer::StackStatus;
use crate::ledger::EntryStatus;
use crate::orchestrator::{RunReport, RunStatus};
use crate::planner::{ActionType, ExecutionPlan};
use crate::state::{LockInfo, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    number: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Calls")]
    attempts: u32,
    #[tabled(rename = "Handle")]
    handle: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl OutputFormatter {
    /// Creates a formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats an execution plan.
    #[must_use]
    pub fn format_plan(&self, plan: &ExecutionPlan) -> String {
        if self.format == OutputFormat::Json {
            return to_json(plan);
        }
        if plan.is_empty() {
            return format!("{} Stack declares no resources.\n", "✓".green());
        }

        let rows: Vec<PlanRow> = plan
            .steps
            .iter()
            .map(|s| PlanRow {
                number: s.number,
                action: Self::format_action(s.action),
                kind: s.kind.to_string(),
                resource: s.resource.to_string(),
                after: s
                    .after
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        let mut output = String::from("\nExecution plan\n\n");
        output.push_str(&Table::new(rows).to_string());
        let _ = write!(
            output,
            "\n\nPlan: {} resource(s) to {}\n",
            plan.step_count(),
            plan.action
        );
        output
    }

    /// Formats a run report.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        if self.format == OutputFormat::Json {
            return to_json(report);
        }

        let rows: Vec<ResourceRow> = report
            .entries
            .iter()
            .map(|e| ResourceRow {
                resource: e.resource_id.to_string(),
                kind: e.kind.to_string(),
                status: Self::format_entry_status(e.status),
                attempts: e.attempts,
                handle: e
                    .provider_handle
                    .as_ref()
                    .map_or_else(String::new, |h| truncate(h.as_str(), 48)),
                error: e
                    .rollback_error
                    .as_deref()
                    .or(e.error.as_deref())
                    .map_or_else(String::new, |err| truncate(err, 60)),
            })
            .collect();

        let mut output = String::new();
        let _ = writeln!(output, "\n{} run {}\n", report.operation, report.run_id);
        output.push_str(&Table::new(rows).to_string());
        let _ = write!(output, "\n\nResult: {}", Self::format_run_status(report.status));
        if let Some(ms) = report.duration_ms() {
            let _ = write!(output, " in {ms} ms");
        }
        output.push('\n');

        if let Some(cause) = &report.cause {
            let _ = writeln!(output, "Cause: {cause}");
        }
        if !report.manual_cleanup.is_empty() {
            let _ = writeln!(output, "\n{} Manual cleanup required:", "⚠".yellow());
            for id in &report.manual_cleanup {
                let handle = report
                    .entry(id.as_str())
                    .and_then(|e| e.provider_handle.as_ref())
                    .map_or_else(String::new, |h| format!(" ({h})"));
                let _ = writeln!(output, "   - {id}{handle}");
            }
        }
        output
    }

    /// Formats the stack status.
    #[must_use]
    pub fn format_status(&self, status: &StackStatus) -> String {
        if self.format == OutputFormat::Json {
            return to_json(status);
        }

        let mut output = String::new();
        let _ = writeln!(
            output,
            "\nStack: {}/{} ({} state at {})\n",
            status.project, status.environment, status.backend, status.location
        );

        if !status.has_state {
            output.push_str("   Nothing recorded yet.\n");
            return output;
        }

        if let Some(last) = &status.last_run {
            let _ = writeln!(
                output,
                "   Last run: {} {} at {}",
                last.operation,
                Self::format_run_status(last.status),
                last.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
        if status.config_changed {
            let _ = writeln!(
                output,
                "   {} Stack file changed since the last run",
                "⚠".yellow()
            );
        }
        if let Some(lock) = &status.lock {
            let _ = writeln!(output, "   {}", Self::describe_lock(lock));
        }

        if status.live.is_empty() {
            output.push_str("\n   No live resources.\n");
        } else {
            let _ = writeln!(output, "\n   Live resources ({}):", status.live.len());
            for resource in &status.live {
                let handle = resource
                    .provider_handle
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string);
                let marker = if resource.needs_manual_cleanup {
                    " (manual cleanup)".red().to_string()
                } else {
                    String::new()
                };
                let _ = writeln!(
                    output,
                    "     {} {} {handle}{marker}",
                    resource.kind, resource.resource_id
                );
            }
        }
        output
    }

    /// Formats the raw state.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        if self.format == OutputFormat::Json {
            return to_json(state);
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nState: {}/{}\n", state.project, state.environment);
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(
            output,
            "   Config hash: {}",
            ConfigHasher::short_hash(&state.config_hash, 8)
        );
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        if let Some(ledger) = &state.last_run {
            let _ = writeln!(
                output,
                "   Last run: {} {} ({} resources, {} events)",
                ledger.operation,
                ledger.run_id,
                ledger.len(),
                ledger.events().len()
            );
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let mark = if entry.status.is_success() {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let _ = writeln!(
                    output,
                    "     {mark} {} - {} {} ({} resources)",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.status,
                    entry.resources.len()
                );
            }
        }
        output
    }

    /// Formats a validation outcome.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        if self.format == OutputFormat::Json {
            let json = serde_json::json!({
                "valid": result.is_valid(),
                "project": config.project.name,
                "environment": config.project.environment,
                "resources": config.resources.len(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            });
            return to_json(&json);
        }

        let mut output = if result.is_valid() {
            format!("{} Stack is valid\n", "✓".green())
        } else {
            let mut out = format!("{} {} error(s):\n", "✗".red(), result.error_count());
            for error in &result.errors {
                let _ = writeln!(out, "   - {error}");
            }
            out
        };
        if show_warnings && !result.warnings.is_empty() {
            output.push_str("\nWarnings:\n");
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }
        let _ = write!(
            output,
            "\nProject: {}/{}\nResources: {}\n",
            config.project.name,
            config.project.environment,
            config.resources.len()
        );
        output
    }

    /// Formats a lock record.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!("{}\n", Self::describe_lock(lock)),
        }
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn message(&self, level: MessageLevel, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": level.label(),
                "message": message,
            })),
            OutputFormat::Text => {
                let mark = match level {
                    MessageLevel::Success => "✓".green(),
                    MessageLevel::Warning => "⚠".yellow(),
                    MessageLevel::Error => "✗".red(),
                };
                format!("{mark} {message}")
            }
        }
    }

    fn describe_lock(lock: &LockInfo) -> String {
        let state = if lock.is_expired() {
            "expired".dimmed().to_string()
        } else {
            format!("{}s left", lock.remaining_secs())
        };
        format!(
            "Locked by {} for {} since {} ({state}), lock id {}",
            lock.holder,
            lock.operation.as_deref().unwrap_or("unknown"),
            lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
            lock.lock_id
        )
    }

    fn format_action(action: ActionType) -> String {
        match action {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }

    fn format_entry_status(status: EntryStatus) -> String {
        let text = status.to_string();
        match status {
            EntryStatus::Ready => text.green().to_string(),
            EntryStatus::Deleted => text.dimmed().to_string(),
            EntryStatus::Failed => text.red().to_string(),
            EntryStatus::Pending | EntryStatus::InProgress | EntryStatus::Deleting => {
                text.yellow().to_string()
            }
        }
    }

    fn format_run_status(status: RunStatus) -> String {
        let text = status.to_string();
        match status {
            RunStatus::Succeeded => text.green().to_string(),
            RunStatus::FailedRolledBack => text.yellow().to_string(),
            RunStatus::FailedPartialState => text.red().bold().to_string(),
        }
    }
}

/// Severity of a one-line message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    /// Something completed.
    Success,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl MessageLevel {
    const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{RunLedger, RunOperation};
    use crate::provider::ProviderHandle;
    use crate::resource::{ResourceId, ResourceKind};

    fn failed_report() -> RunReport {
        let a = ResourceId::new("a");
        let mut ledger = RunLedger::new(RunOperation::Create, [(a.clone(), ResourceKind::Role)]);
        ledger.start(&a).unwrap();
        ledger.mark_ready(&a, ProviderHandle::new("arn:aws:iam::1:role/a"), 1).unwrap();
        ledger.begin_delete(&a).unwrap();
        ledger.restore_ready(&a, "access denied".to_string(), 1).unwrap();
        ledger.finish();
        RunReport::from_ledger(
            ledger,
            &[a],
            RunStatus::FailedPartialState,
            Some("b: boom".to_string()),
        )
    }

    #[test]
    fn test_report_text_lists_manual_cleanup() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&failed_report());
        assert!(text.contains("failed (partial state)"));
        assert!(text.contains("Cause: b: boom"));
        assert!(text.contains("Manual cleanup required"));
        assert!(text.contains("arn:aws:iam::1:role/a"));
    }

    #[test]
    fn test_report_json() {
        let json = OutputFormatter::new(OutputFormat::Json).format_report(&failed_report());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "failed_partial_state");
        assert_eq!(value["manual_cleanup"][0], "a");
        assert_eq!(value["entries"][0]["rollback_error"], "access denied");
    }

    #[test]
    fn test_message_json() {
        let json = OutputFormatter::new(OutputFormat::Json).message(MessageLevel::Warning, "careful");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "warning");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
