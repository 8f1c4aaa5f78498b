//! Plain-text rendering.

use super::{Report, StageReport};
use crate::core::{StageErrorKind, StageResult, StageStatus};
use std::fmt::Write as _;

const STATUS_WIDTH: usize = 9;

fn tag(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Succeeded => "ok",
        StageStatus::Failed => "FAILED",
        StageStatus::Skipped => "skipped",
        StageStatus::Cancelled => "cancelled",
    }
}

fn detail(stage: &StageReport, with_timings: bool) -> Vec<String> {
    let mut parts = Vec::new();
    match stage.status {
        StageStatus::Failed => match (stage.error_kind, stage.exit_code) {
            (Some(StageErrorKind::ExitCode), Some(code)) => parts.push(format!("exit code {code}")),
            (Some(kind), _) => parts.push(kind.to_string()),
            (None, _) => {}
        },
        StageStatus::Skipped | StageStatus::Cancelled => {
            if let Some(message) = &stage.message {
                parts.push(message.clone());
            }
        }
        StageStatus::Pending | StageStatus::Running | StageStatus::Succeeded => {}
    }
    if with_timings {
        if let Some(ms) = stage.duration_ms {
            parts.push(format!("{ms} ms"));
        }
    }
    if !stage.required {
        parts.push("optional".to_string());
    }
    parts
}

fn line(stage: &StageReport, with_timings: bool) -> String {
    let parts = detail(stage, with_timings);
    let mut out = format!("{:<STATUS_WIDTH$} {}", tag(stage.status), stage.name);
    if !parts.is_empty() {
        let _ = write!(out, " ({})", parts.join(", "));
    }
    out
}

/// Formats the one-line status the CLI prints when a stage completes.
#[must_use]
pub fn status_line(result: &StageResult) -> String {
    line(&StageReport::from_result(result), true)
}

pub(super) fn render(report: &Report, with_timings: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Pipeline '{}' {} (exit code {})",
        report.pipeline, report.status, report.exit_code
    );
    for stage in &report.stages {
        let _ = writeln!(out, "  {}", line(stage, with_timings));
    }

    let counts = &report.counts;
    let _ = writeln!(
        out,
        "Stages: {} total, {} succeeded, {} failed, {} skipped, {} cancelled",
        counts.total, counts.succeeded, counts.failed, counts.skipped, counts.cancelled
    );
    if with_timings {
        if let Some(ms) = report.wall_clock_ms {
            let _ = writeln!(out, "Wall clock: {ms} ms");
        }
    }

    let failures: Vec<&StageReport> = report.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "Failures:");
        for stage in failures {
            let message = stage.message.as_deref().unwrap_or("failed");
            let _ = writeln!(out, "  {}: {message}", stage.name);
            let _ = writeln!(out, "    re-run with --only {}", stage.name);
        }
    }
    out
}
