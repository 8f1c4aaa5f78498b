//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications
//! - A builder that validates names and dependencies
//! - The validated [`StageGraph`] with its Kahn batches
//! - The concurrent [`PipelineExecutor`]
//! - Failure tolerance modes and the execution policy

mod builder;
mod dag;
mod executor;
mod failure_tolerance;
mod policy;
mod spec;


pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use executor::PipelineExecutor;
pub use failure_tolerance::{FailureCollector, FailureMode, FailureRecord};
pub use policy::{default_concurrency, ExecutionPolicy};
pub use spec::StageSpec;
