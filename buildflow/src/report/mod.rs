//! Run reports.
//!
//! [`ReportAggregator::summarize`] turns a finalized [`PipelineRun`] into a
//! [`Report`]: per-stage entries in declaration order, counts, the overall
//! status and exit code, and the run's wall-clock duration.

mod render;

pub use render::status_line;

use crate::core::{PipelineRun, RunStatus, SkipReason, StageErrorKind, StageResult, StageStatus};
use crate::errors::BuildflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stage's line in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name.
    pub name: String,
    /// Final status.
    pub status: StageStatus,
    /// Whether the stage was required.
    pub required: bool,
    /// Run time, if the stage ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Process exit code, if the process exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<StageErrorKind>,
    /// Failure message, cancellation reason or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl StageReport {
    fn from_result(result: &StageResult) -> Self {
        let message = result
            .error()
            .map(|e| e.message.clone())
            .or_else(|| result.cancel_reason().map(str::to_string))
            .or_else(|| result.skip_reason().map(ToString::to_string));
        Self {
            name: result.name.clone(),
            status: result.status(),
            required: result.required,
            duration_ms: result.duration_ms(),
            exit_code: result.exit_code(),
            error_kind: result.error().map(|e| e.kind),
            message,
            skip_reason: result.skip_reason().cloned(),
        }
    }
}

/// Stage counts by final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// All stages.
    pub total: usize,
    /// Succeeded stages.
    pub succeeded: usize,
    /// Failed stages.
    pub failed: usize,
    /// Skipped stages.
    pub skipped: usize,
    /// Cancelled stages.
    pub cancelled: usize,
}

impl StageCounts {
    fn tally(results: &[StageResult]) -> Self {
        results.iter().fold(
            Self {
                total: results.len(),
                ..Self::default()
            },
            |mut counts, r| {
                match r.status() {
                    StageStatus::Succeeded => counts.succeeded += 1,
                    StageStatus::Failed => counts.failed += 1,
                    StageStatus::Skipped => counts.skipped += 1,
                    StageStatus::Cancelled => counts.cancelled += 1,
                    StageStatus::Pending | StageStatus::Running => {}
                }
                counts
            },
        )
    }
}

/// The summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// The run id.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: RunStatus,
    /// Process exit code for the run.
    pub exit_code: i32,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Finish minus start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_clock_ms: Option<i64>,
    /// Stage counts.
    pub counts: StageCounts,
    /// Per-stage entries in declaration order.
    pub stages: Vec<StageReport>,
}

impl Report {
    /// Returns the failed stages.
    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
    }

    /// Renders the report as text.
    #[must_use]
    pub fn render_text(&self) -> String {
        render::render(self, true)
    }

    /// Renders the report as text without durations, so two runs with the
    /// same outcomes render identically.
    #[must_use]
    pub fn render_text_without_timings(&self) -> String {
        render::render(self, false)
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn to_json(&self) -> Result<String, BuildflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds reports from pipeline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAggregator;

impl ReportAggregator {
    /// Summarizes a run.
    #[must_use]
    pub fn summarize(run: &PipelineRun) -> Report {
        Report {
            run_id: run.run_id,
            pipeline: run.pipeline.clone(),
            status: run.status(),
            exit_code: run.exit_code(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            wall_clock_ms: run.wall_clock_ms(),
            counts: StageCounts::tally(run.results()),
            stages: run.results().iter().map(StageReport::from_result).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageError;
    use crate::process::ProcessOutput;
    use pretty_assertions::assert_eq;

    fn output(code: i32) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(code),
            ..ProcessOutput::default()
        }
    }

    fn finished_run() -> PipelineRun {
        let mut run = PipelineRun::new(
            "cmake",
            [
                ("configure", true),
                ("build", true),
                ("test", true),
                ("format", false),
            ],
        );
        run.result_at_mut(0).skip(SkipReason::Unchanged, None).unwrap();
        run.result_at_mut(1).start().unwrap();
        run.result_at_mut(1).fail_with_output(output(2)).unwrap();
        run.result_at_mut(2).cancel("dependency 'build' failed").unwrap();
        run.result_at_mut(3)
            .skip(
                SkipReason::ToolUnavailable {
                    tool: "clang-format".into(),
                },
                None,
            )
            .unwrap();
        run.finalize(false).unwrap();
        run
    }

    #[test]
    fn test_summarize() {
        let report = ReportAggregator::summarize(&finished_run());

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code, 1);
        assert_eq!(
            report.counts,
            StageCounts {
                total: 4,
                succeeded: 0,
                failed: 1,
                skipped: 2,
                cancelled: 1,
            }
        );
        let names: Vec<&str> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["configure", "build", "test", "format"]);

        let failures: Vec<&StageReport> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].exit_code, Some(2));
        assert_eq!(failures[0].error_kind, Some(StageErrorKind::ExitCode));
        assert_eq!(
            report.stages[2].message.as_deref(),
            Some("dependency 'build' failed")
        );
    }

    #[test]
    fn test_wall_clock_is_not_sum_of_stages() {
        let report = ReportAggregator::summarize(&finished_run());
        assert!(report.wall_clock_ms.is_some());
        assert_eq!(report.stages[0].duration_ms, None);
    }

    #[test]
    fn test_json_round_trip_keeps_failures() {
        let report = ReportAggregator::summarize(&finished_run());
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["stages"][1]["error_kind"], "exit_code");
        assert_eq!(value["stages"][3]["skip_reason"]["kind"], "tool_unavailable");

        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_launch_error_message() {
        let mut run = PipelineRun::new("p", [("package", true)]);
        run.result_at_mut(0)
            .fail(StageError::new(StageErrorKind::Launch, "cpack not found"))
            .unwrap();
        run.finalize(false).unwrap();

        let report = ReportAggregator::summarize(&run);
        assert_eq!(report.stages[0].message.as_deref(), Some("cpack not found"));
        assert_eq!(report.stages[0].exit_code, None);
    }
}
