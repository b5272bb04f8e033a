use crate::dispatcher::operation::Operation;
use crate::error::{LogicalBackupError, Result};
use crate::relay::{FailureKind, ProgressEstimate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { kind: FailureKind },
}

/// Summary of a finished run, successful or not.
///
/// `exit_code` is the tool's own code; it is `None` when the tool never
/// started or was killed by a signal.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: Operation,
    pub destination: Option<PathBuf>,
    pub command: String,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub lines_relayed: usize,
    pub last_progress: Option<ProgressEstimate>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub summary: String,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn display_summary(&self) -> String {
        let status = match self.outcome {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed { .. } => "failed",
        };
        let mut summary = format!(
            "Operation: {} ({})\nCommand: {}\nExit code: {}\nLines: {}",
            self.operation,
            status,
            self.command,
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.lines_relayed,
        );
        if let Some(ref destination) = self.destination {
            summary.push_str(&format!("\nDestination: {}", destination.display()));
        }
        summary
    }
}

/// Outcome of a run as returned by its handle: the report is always present.
#[derive(Debug)]
pub struct RunResult {
    pub report: RunReport,
    pub error: Option<LogicalBackupError>,
}

impl RunResult {
    pub fn into_result(self) -> Result<RunReport> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }
}
