//! Core domain model types for buildflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Stage status and skip reasons
//! - Per-stage results with an enforced lifecycle
//! - The pipeline run aggregate

mod result;
mod run;
mod status;

pub use result::{StageError, StageErrorKind, StageResult};
pub use run::{PipelineRun, RunStatus};
pub use status::{SkipReason, StageStatus};
