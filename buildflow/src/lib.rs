//! # Buildflow
//!
//! A dependency-aware, incremental build pipeline orchestrator.
//!
//! Buildflow runs a graph of external tool invocations with support for:
//!
//! - **Validated stage graphs**: duplicate names, unknown dependencies and
//!   cycles are rejected before anything runs
//! - **Bounded concurrency**: independent stages run in parallel up to a limit
//! - **Failure policies**: fail fast, or keep running unaffected branches
//! - **Incremental execution**: unchanged cacheable stages are skipped by
//!   fingerprint
//! - **Cancellation**: external or policy-driven, terminating whole process groups
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use buildflow::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), BuildflowError> {
//! let graph = PipelineBuilder::new("demo")
//!     .stage(StageSpec::new("configure", CommandSpec::new("cmake").args(["-S", ".", "-B", "build"])))?
//!     .stage(
//!         StageSpec::new("build", CommandSpec::new("cmake").args(["--build", "build"]))
//!             .with_dependency("configure"),
//!     )?
//!     .build()?;
//!
//! let executor = PipelineExecutor::new(Arc::new(SystemProcessRunner::new(".")));
//! let run = executor
//!     .execute(&graph, &ExecutionPolicy::default(), &CancellationToken::new())
//!     .await?;
//! println!("{}", ReportAggregator::summarize(&run).render_text());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod incremental;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod testing;

#[cfg(feature = "presets")]
pub mod presets;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::BuildflowConfig;
    pub use crate::core::{
        PipelineRun, RunStatus, SkipReason, StageError, StageErrorKind, StageResult, StageStatus,
    };
    pub use crate::errors::{exit_codes, BuildflowError, GraphError, ProcessError};
    pub use crate::events::{
        CollectingEventSink, EventKind, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::incremental::{IncrementalTracker, InputSource};
    pub use crate::pipeline::{
        ExecutionPolicy, FailureMode, PipelineBuilder, PipelineExecutor, StageGraph, StageSpec,
    };
    pub use crate::process::{CommandSpec, ProcessOutput, ProcessRunner, SystemProcessRunner};
    pub use crate::report::{Report, ReportAggregator};
}
