//! Error types for the buildflow orchestrator.
//!
//! Errors fall into these families:
//! - configuration errors ([`GraphError`]) detected before any stage runs,
//! - process errors ([`ProcessError`]) that are attached to a single stage result,
//! - fingerprint errors ([`FingerprintError`]) that only ever force a re-run,
//! - everything else wrapped by [`BuildflowError`].

use crate::core::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Process exit codes returned to callers of the orchestrator.
pub mod exit_codes {
    /// The pipeline run succeeded.
    pub const SUCCESS: i32 = 0;
    /// At least one required stage failed or was cancelled by a failure.
    pub const STAGE_FAILURE: i32 = 1;
    /// The pipeline definition or configuration was invalid.
    pub const CONFIGURATION: i32 = 2;
    /// An unexpected internal error occurred.
    pub const INTERNAL: i32 = 70;
    /// The run was cancelled externally (e.g. Ctrl-C).
    pub const CANCELLED: i32 = 130;
}

/// The main error type for buildflow operations.
#[derive(Debug, Error)]
pub enum BuildflowError {
    /// The stage graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// An external process could not be run to completion.
    #[error("{0}")]
    Process(#[from] ProcessError),

    /// The configuration file or options are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage result was asked to make an illegal lifecycle transition.
    #[error("Invalid transition for stage '{stage}': {from} -> {to}")]
    InvalidTransition {
        /// The stage name.
        stage: String,
        /// The current status.
        from: StageStatus,
        /// The requested status.
        to: StageStatus,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BuildflowError {
    /// Returns the process exit code that best describes this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Graph(_) | Self::Config(_) => exit_codes::CONFIGURATION,
            Self::Process(ProcessError::Cancelled { .. }) => exit_codes::CANCELLED,
            Self::Process(_) => exit_codes::STAGE_FAILURE,
            Self::InvalidTransition { .. }
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => exit_codes::INTERNAL,
        }
    }

    /// Returns true if this error was detected before scheduling any stage.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        self.exit_code() == exit_codes::CONFIGURATION
    }
}

/// Diagnostic metadata attached to configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DiagnosticInfo {
    /// Error code (e.g., "GRAPH-003-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl DiagnosticInfo {
    /// Creates a new diagnostic.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while defining or validating a stage graph.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Two stages share a name.
    #[error("{0}")]
    DuplicateStage(#[from] DuplicateStageError),

    /// A stage depends on a stage that was never declared.
    #[error("{0}")]
    UnknownDependency(#[from] UnknownDependencyError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A selected stage does not exist in the graph.
    #[error("Unknown stage '{name}'")]
    UnknownStage {
        /// The requested stage name.
        name: String,
    },

    /// The pipeline has no stages to run.
    #[error("Pipeline '{pipeline}' has no stages: {reason}")]
    EmptyPipeline {
        /// The pipeline name.
        pipeline: String,
        /// Why the pipeline ended up empty.
        reason: String,
    },
}

impl GraphError {
    /// Returns the stage names involved in the error.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        match self {
            Self::DuplicateStage(e) => vec![e.stage.clone()],
            Self::UnknownDependency(e) => vec![e.stage.clone(), e.dependency.clone()],
            Self::Cycle(e) => e.cycle_path.clone(),
            Self::UnknownStage { name } => vec![name.clone()],
            Self::EmptyPipeline { .. } => Vec::new(),
        }
    }

    /// Returns diagnostic metadata for the error.
    #[must_use]
    pub fn diagnostic(&self) -> DiagnosticInfo {
        match self {
            Self::DuplicateStage(e) => e.diagnostic.clone(),
            Self::UnknownDependency(e) => e.diagnostic.clone(),
            Self::Cycle(e) => e.diagnostic.clone(),
            Self::UnknownStage { name } => {
                DiagnosticInfo::new("GRAPH-004-UNKNOWN_STAGE", format!("Stage '{name}' not found"))
                    .with_fix_hint("Check the stage name against `buildflow plan`.")
            }
            Self::EmptyPipeline { reason, .. } => {
                DiagnosticInfo::new("GRAPH-005-EMPTY", reason.clone())
                    .with_fix_hint("Add at least one stage to the pipeline before building.")
            }
        }
    }
}

/// Error raised when a stage name is declared twice.
#[derive(Debug, Clone, Error)]
#[error("Duplicate stage '{stage}'")]
pub struct DuplicateStageError {
    /// The duplicated name.
    pub stage: String,
    /// Diagnostic metadata.
    pub diagnostic: DiagnosticInfo,
}

impl DuplicateStageError {
    /// Creates a new duplicate stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        let diagnostic = DiagnosticInfo::new(
            "GRAPH-001-DUPLICATE",
            format!("Stage '{stage}' is declared more than once"),
        )
        .with_fix_hint("Rename one of the stages.");
        Self { stage, diagnostic }
    }
}

/// Error raised when a dependency name is not declared in the graph.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
pub struct UnknownDependencyError {
    /// The stage declaring the dependency.
    pub stage: String,
    /// The missing dependency.
    pub dependency: String,
    /// Diagnostic metadata.
    pub diagnostic: DiagnosticInfo,
}

impl UnknownDependencyError {
    /// Creates a new unknown dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        let stage = stage.into();
        let dependency = dependency.into();
        let diagnostic = DiagnosticInfo::new(
            "GRAPH-002-MISSING_DEP",
            format!("Dependency '{dependency}' not found"),
        )
        .with_fix_hint("Declare the dependency as a stage, or check for typos in stage names.")
        .with_context_entry("stage", stage.clone());
        Self {
            stage,
            dependency,
            diagnostic,
        }
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The path of stages forming the cycle, first member repeated at the end.
    pub cycle_path: Vec<String>,
    /// Diagnostic metadata.
    pub diagnostic: DiagnosticInfo,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let diagnostic = DiagnosticInfo::new(
            "GRAPH-003-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");
        Self {
            cycle_path,
            diagnostic,
        }
    }

    /// Returns true if the named stage takes part in the cycle.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.cycle_path.iter().any(|s| s == stage)
    }
}

/// Errors produced while running an external process.
///
/// A non-zero exit code is *not* an error; it is reported through
/// [`crate::process::ProcessOutput`].
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be found or started.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        /// The program that failed to start.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A required tool is not available on the search path.
    #[error("Required tool '{tool}' was not found")]
    ToolNotFound {
        /// The missing tool.
        tool: String,
    },

    /// The process exceeded its timeout and was terminated.
    #[error("'{program}' timed out after {timeout_ms}ms (elapsed {elapsed_ms}ms)")]
    Timeout {
        /// The program that timed out.
        program: String,
        /// The configured timeout.
        timeout_ms: u64,
        /// Time elapsed before the process was killed.
        elapsed_ms: u64,
        /// Standard output captured before the kill.
        stdout: String,
        /// Standard error captured before the kill.
        stderr: String,
    },

    /// The process was terminated because the pipeline was cancelled.
    #[error("'{program}' cancelled: {reason}")]
    Cancelled {
        /// The program that was terminated.
        program: String,
        /// The cancellation reason.
        reason: String,
    },

    /// IO error while supervising the process.
    #[error("IO error while running '{program}': {source}")]
    Io {
        /// The supervised program.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Creates a launch error.
    #[must_use]
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    /// Creates a tool-not-found error.
    #[must_use]
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Returns true if the process was stopped by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors produced while computing a stage fingerprint.
///
/// These never fail a run; the tracker treats them as "inputs changed".
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// An input file or directory could not be read.
    #[error("Cannot read fingerprint input '{}': {source}", path.display())]
    Io {
        /// The unreadable path.
        path: std::path::PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An input glob could not be compiled.
    #[error("Invalid input pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// The command descriptor could not be serialized.
    #[error("Cannot serialize command descriptor: {0}")]
    Serialization(#[from] serde_json::Error),
}
