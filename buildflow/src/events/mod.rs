//! Pipeline events.
//!
//! The executor reports every stage transition to an [`EventSink`]. The CLI
//! uses this to print a status line per stage as it completes; tests use
//! [`CollectingEventSink`] to assert on transitions.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::StageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The executor started scheduling.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A stage process was launched.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage succeeded.
    #[serde(rename = "stage.succeeded")]
    StageSucceeded,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// A stage was skipped.
    #[serde(rename = "stage.skipped")]
    StageSkipped,
    /// A stage was cancelled.
    #[serde(rename = "stage.cancelled")]
    StageCancelled,
    /// The run was finalized.
    #[serde(rename = "run.finished")]
    RunFinished,
}

impl EventKind {
    /// Returns the dotted event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::StageStarted => "stage.started",
            Self::StageSucceeded => "stage.succeeded",
            Self::StageFailed => "stage.failed",
            Self::StageSkipped => "stage.skipped",
            Self::StageCancelled => "stage.cancelled",
            Self::RunFinished => "run.finished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event emitted by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The run the event belongs to.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// The stage, for stage events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// A snapshot of the stage result after the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StageResult>,
    /// Extra detail (run status, run reason, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event without a stage.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self {
            kind,
            run_id,
            pipeline: pipeline.into(),
            stage: None,
            result: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches a stage result snapshot (and its stage name).
    #[must_use]
    pub fn with_result(mut self, result: StageResult) -> Self {
        self.stage = Some(result.name.clone());
        self.result = Some(result);
        self
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
