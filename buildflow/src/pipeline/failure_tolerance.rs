//! Failure tolerance for DAG execution.
//!
//! The failure mode decides whether a required stage failure stops the whole
//! run or only the failed stage's downstream branch.

use crate::core::{StageErrorKind, StageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How to handle stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Cancel every pending and running stage on the first required failure (default).
    #[default]
    FailFast,
    /// Cancel only the dependents of a failed stage; keep running unrelated branches.
    ContinueOnError,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::ContinueOnError => write!(f, "continue-on-error"),
        }
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(Self::FailFast),
            "continue-on-error" | "continue" => Ok(Self::ContinueOnError),
            other => Err(format!(
                "unknown failure mode '{other}' (expected fail-fast or continue-on-error)"
            )),
        }
    }
}

/// Record of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage name.
    pub stage: String,
    /// Whether the stage was required.
    pub required: bool,
    /// Failure classification.
    pub kind: StageErrorKind,
    /// Exit code, when the process exited.
    pub exit_code: Option<i32>,
    /// Error message.
    pub message: String,
}

impl FailureRecord {
    /// Builds a record from a failed stage result.
    ///
    /// Returns `None` if the result carries no error.
    #[must_use]
    pub fn from_result(result: &StageResult) -> Option<Self> {
        result.error().map(|error| Self {
            stage: result.name.clone(),
            required: result.required,
            kind: error.kind,
            exit_code: result.exit_code(),
            message: error.message.clone(),
        })
    }
}

/// Collects failures during pipeline execution and applies the failure mode.
#[derive(Debug, Default)]
pub struct FailureCollector {
    /// Failure mode.
    pub mode: FailureMode,
    failures: Vec<FailureRecord>,
    failed_stages: HashSet<String>,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            failures: Vec::new(),
            failed_stages: HashSet::new(),
        }
    }

    /// Records a stage failure.
    ///
    /// Returns true if this failure should stop the run.
    pub fn record_failure(&mut self, record: FailureRecord) -> bool {
        let fatal = self.mode == FailureMode::FailFast && record.required;
        self.failed_stages.insert(record.stage.clone());
        self.failures.push(record);
        fatal
    }

    /// Returns true if the stage has failed.
    #[must_use]
    pub fn has_failed(&self, stage: &str) -> bool {
        self.failed_stages.contains(stage)
    }

    /// Returns true if execution should stop based on mode.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        match self.mode {
            FailureMode::FailFast => self.failures.iter().any(|f| f.required),
            FailureMode::ContinueOnError => false,
        }
    }

    /// Returns all failures in the order they were recorded.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }
}
