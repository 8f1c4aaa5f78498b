//! The aggregate of all stage results for one invocation.

use super::{StageResult, StageStatus};
use crate::errors::{exit_codes, BuildflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages are still being scheduled.
    #[default]
    Running,
    /// Every required stage succeeded or was skipped as unchanged.
    Succeeded,
    /// At least one required stage did not succeed.
    Failed,
    /// The run was cancelled externally.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// All stage results of one pipeline invocation, in graph declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was finalized.
    pub finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
    results: Vec<StageResult>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl PipelineRun {
    /// Creates a run with every stage pending.
    ///
    /// `stages` yields `(name, required)` pairs in declaration order.
    pub fn new<'a>(pipeline: impl Into<String>, stages: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        let results: Vec<StageResult> = stages
            .into_iter()
            .map(|(name, required)| StageResult::pending(name, required))
            .collect();
        let index = results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            results,
            index,
        }
    }

    /// Returns the stage results in declaration order.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// Returns the result for a stage.
    #[must_use]
    pub fn result(&self, name: &str) -> Option<&StageResult> {
        self.index.get(name).map(|&i| &self.results[i])
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.result(name).map(StageResult::status)
    }

    pub(crate) fn result_at(&self, idx: usize) -> &StageResult {
        &self.results[idx]
    }

    pub(crate) fn result_at_mut(&mut self, idx: usize) -> &mut StageResult {
        &mut self.results[idx]
    }

    /// Returns the overall status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns true once every stage is terminal.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.results.iter().all(|r| r.status().is_terminal())
    }

    /// Finalizes the run and computes the overall status.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a stage is still pending or running.
    pub fn finalize(&mut self, externally_cancelled: bool) -> Result<RunStatus, BuildflowError> {
        if let Some(open) = self.results.iter().find(|r| !r.status().is_terminal()) {
            return Err(BuildflowError::Internal(format!(
                "cannot finalize run: stage '{}' is still {}",
                open.name,
                open.status()
            )));
        }

        let required_ok = self
            .results
            .iter()
            .filter(|r| r.required)
            .all(|r| matches!(r.status(), StageStatus::Succeeded | StageStatus::Skipped));

        self.status = if externally_cancelled {
            RunStatus::Cancelled
        } else if required_ok {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(Utc::now());
        Ok(self.status)
    }

    /// Returns the wall-clock duration of the run in milliseconds.
    #[must_use]
    pub fn wall_clock_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Returns the process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Succeeded => exit_codes::SUCCESS,
            RunStatus::Cancelled => exit_codes::CANCELLED,
            RunStatus::Failed | RunStatus::Running => exit_codes::STAGE_FAILURE,
        }
    }
}
