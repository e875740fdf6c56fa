//! Provisioning results and the end-of-run report.
//!
//! Results are appended once and never mutated afterwards; the report is rendered once,
//! at the end of the run.

use crate::schemas::errors::ProvisionError;
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write as _;

/// Longest smoke-output line kept in a result.
pub const SMOKE_LINE_MAX: usize = 120;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Status {
    Installed,
    Skipped,
    Failed,
}

/// Outcome of a liveness probe. A probe failure never turns an entry into `Failed`.
///
/// `Passed` and `Silent` both mean the process started; only a missing binary or a
/// timeout is a failed probe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SmokeOutcome {
    Passed { first_line: String },
    /// Process started but printed nothing.
    Silent,
    BinaryMissing { program: String },
    Timeout { after_secs: u64 },
}

impl SmokeOutcome {
    pub fn ok(&self) -> bool {
        matches!(self, SmokeOutcome::Passed { .. } | SmokeOutcome::Silent)
    }

    pub fn first_line(&self) -> Option<&str> {
        match self {
            SmokeOutcome::Passed { first_line } => Some(first_line),
            _ => None,
        }
    }
}

/// Structured cause attached to every `Failed` result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureCause {
    pub kind: String,
    pub message: String,
}

impl From<&ProvisionError> for FailureCause {
    fn from(err: &ProvisionError) -> Self {
        FailureCause {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProvisionResult {
    pub name: String,
    pub status: Status,
    pub required: bool,
    pub duration_ms: u128,
    pub smoke: Option<SmokeOutcome>,
    /// Present iff `status == Failed`.
    pub error: Option<FailureCause>,
    /// Extra facts worth surfacing, e.g. which extraction strategy produced a binary.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OverallStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningReport {
    pub started_at: String,
    pub results: Vec<ProvisionResult>,
    pub status: OverallStatus,
}

impl ProvisioningReport {
    /// Builds the report; the aggregate status only looks at required entries.
    pub fn new(started_at: String, results: Vec<ProvisionResult>) -> Self {
        let status = if results
            .iter()
            .any(|r| r.required && r.status == Status::Failed)
        {
            OverallStatus::Failed
        } else {
            OverallStatus::Success
        };
        ProvisioningReport {
            started_at,
            results,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OverallStatus::Success
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&ProvisionResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// One line per entry plus a summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let width = self
            .results
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        for r in &self.results {
            // Pad before colouring: escape codes would count towards the width.
            let label = |text: &str| format!("{:<18}", text);
            let status = match r.status {
                Status::Installed => label("Installed").green().to_string(),
                Status::Skipped => label("Skipped").cyan().to_string(),
                Status::Failed if r.required => label("Failed").red().bold().to_string(),
                Status::Failed => label("Failed (optional)").yellow().to_string(),
            };
            let _ = write!(
                out,
                "{:<width$}  {}  {:>8}ms",
                r.name,
                status,
                r.duration_ms,
                width = width
            );
            if let Some(smoke) = &r.smoke {
                let _ = write!(out, "  smoke: {}", describe_smoke(smoke));
            }
            if let Some(detail) = &r.detail {
                let _ = write!(out, "  [{}]", detail);
            }
            if let Some(err) = &r.error {
                let _ = write!(out, "  {}: {}", err.kind, err.message);
            }
            out.push('\n');
        }

        let overall = match self.status {
            OverallStatus::Success => "SUCCESS".green().bold(),
            OverallStatus::Failed => "FAILED".red().bold(),
        };
        let _ = writeln!(
            out,
            "{} installed, {} skipped, {} failed -> {}",
            self.count(Status::Installed),
            self.count(Status::Skipped),
            self.count(Status::Failed),
            overall
        );
        out
    }
}

fn describe_smoke(smoke: &SmokeOutcome) -> String {
    match smoke {
        SmokeOutcome::Passed { first_line } => format!("ok ({})", first_line),
        SmokeOutcome::Silent => "no output".to_string(),
        SmokeOutcome::BinaryMissing { program } => format!("'{}' not on lookup path", program),
        SmokeOutcome::Timeout { after_secs } => format!("timed out after {}s", after_secs),
    }
}

/// First non-empty line of `output`, cut to [`SMOKE_LINE_MAX`] characters.
pub fn first_line_truncated(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() > SMOKE_LINE_MAX {
        let cut: String = line.chars().take(SMOKE_LINE_MAX).collect();
        Some(format!("{}...", cut))
    } else {
        Some(line.to_string())
    }
}
