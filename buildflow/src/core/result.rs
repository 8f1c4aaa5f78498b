//! Per-stage result with an enforced lifecycle.

use super::{SkipReason, StageStatus};
use crate::errors::{BuildflowError, ProcessError};
use crate::process::ProcessOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The executable could not be started.
    Launch,
    /// A tool the stage requires is missing.
    ToolNotFound,
    /// The process exceeded its timeout.
    Timeout,
    /// The process exited with a code the stage does not accept.
    ExitCode,
    /// The orchestrator itself failed while supervising the stage.
    Internal,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch => write!(f, "launch error"),
            Self::ToolNotFound => write!(f, "tool not found"),
            Self::Timeout => write!(f, "timeout"),
            Self::ExitCode => write!(f, "exit code"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Error detail attached to a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// What went wrong.
    pub kind: StageErrorKind,
    /// Human readable detail (OS error text, elapsed time, ...).
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ProcessError> for StageError {
    fn from(err: &ProcessError) -> Self {
        let kind = match err {
            ProcessError::Launch { .. } => StageErrorKind::Launch,
            ProcessError::ToolNotFound { .. } => StageErrorKind::ToolNotFound,
            ProcessError::Timeout { .. } => StageErrorKind::Timeout,
            ProcessError::Cancelled { .. } | ProcessError::Io { .. } => StageErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

/// The outcome of one stage in one pipeline run.
///
/// Created `Pending`; moves exactly once along `Running -> {Succeeded, Failed,
/// Cancelled}` or directly to `Skipped`/`Cancelled`, and is immutable once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub name: String,
    /// Whether a failure of this stage fails the pipeline.
    pub required: bool,
    status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<StageError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
}

impl StageResult {
    /// Creates a pending result.
    #[must_use]
    pub fn pending(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            status: StageStatus::Pending,
            skip_reason: None,
            cancel_reason: None,
            started_at: None,
            ended_at: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            fingerprint: None,
        }
    }

    fn transition(&mut self, allowed_from: &[StageStatus], to: StageStatus) -> Result<(), BuildflowError> {
        if !allowed_from.contains(&self.status) {
            return Err(BuildflowError::InvalidTransition {
                stage: self.name.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Marks the stage as running.
    pub fn start(&mut self) -> Result<(), BuildflowError> {
        self.transition(&[StageStatus::Pending], StageStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records a process that exited with an accepted code.
    pub fn succeed(&mut self, output: ProcessOutput, fingerprint: Option<String>) -> Result<(), BuildflowError> {
        self.transition(&[StageStatus::Running], StageStatus::Succeeded)?;
        self.finish_with(output);
        self.fingerprint = fingerprint;
        Ok(())
    }

    /// Records a process that exited with a code the stage does not accept.
    pub fn fail_with_output(&mut self, output: ProcessOutput) -> Result<(), BuildflowError> {
        let code = output
            .exit_code
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exited with code {c}"));
        self.transition(&[StageStatus::Running], StageStatus::Failed)?;
        self.finish_with(output);
        self.error = Some(StageError::new(StageErrorKind::ExitCode, code));
        Ok(())
    }

    /// Records a failure that happened without a usable process result.
    ///
    /// A pending stage may fail directly when its pre-launch checks fail.
    pub fn fail(&mut self, error: StageError) -> Result<(), BuildflowError> {
        let was_pending = self.status == StageStatus::Pending;
        self.transition(&[StageStatus::Pending, StageStatus::Running], StageStatus::Failed)?;
        let now = Utc::now();
        if was_pending {
            self.started_at = Some(now);
        }
        self.ended_at = Some(now);
        self.error = Some(error);
        Ok(())
    }

    /// Records a failure of a process that was killed, keeping the output it
    /// produced before the kill.
    pub fn fail_with_partial_output(
        &mut self,
        error: StageError,
        stdout: String,
        stderr: String,
    ) -> Result<(), BuildflowError> {
        self.fail(error)?;
        self.stdout = stdout;
        self.stderr = stderr;
        Ok(())
    }

    /// Marks a pending stage as skipped.
    pub fn skip(&mut self, reason: SkipReason, fingerprint: Option<String>) -> Result<(), BuildflowError> {
        self.transition(&[StageStatus::Pending], StageStatus::Skipped)?;
        self.skip_reason = Some(reason);
        self.fingerprint = fingerprint;
        Ok(())
    }

    /// Marks a pending or running stage as cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), BuildflowError> {
        let was_running = self.status == StageStatus::Running;
        self.transition(&[StageStatus::Pending, StageStatus::Running], StageStatus::Cancelled)?;
        if was_running {
            self.ended_at = Some(Utc::now());
        }
        self.cancel_reason = Some(reason.into());
        Ok(())
    }

    fn finish_with(&mut self, output: ProcessOutput) {
        self.ended_at = Some(Utc::now());
        self.exit_code = output.exit_code;
        self.stdout = output.stdout;
        self.stderr = output.stderr;
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Returns the skip reason, if skipped.
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Returns when the stage started running.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the stage reached a terminal state after running.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Returns the process exit code, if the process exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns captured stdout.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Returns captured stderr.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Returns the failure detail.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    /// Returns the fingerprint recorded for this stage.
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Returns the duration in milliseconds, if the stage ran.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Returns true if dependents of this stage may run.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        match self.status {
            StageStatus::Succeeded => true,
            StageStatus::Skipped => self
                .skip_reason
                .as_ref()
                .is_some_and(SkipReason::satisfies_dependents),
            _ => false,
        }
    }
}
