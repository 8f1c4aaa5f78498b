//! Stage status and skip reason enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been scheduled yet.
    #[default]
    Pending,
    /// Stage was not executed (see [`SkipReason`]).
    Skipped,
    /// Stage process is currently running.
    Running,
    /// Stage completed with an accepted exit code.
    Succeeded,
    /// Stage failed to launch, timed out, or exited with an unaccepted code.
    Failed,
    /// Stage was short-circuited by a failure policy, an unsatisfied
    /// dependency, or an external cancellation.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Skipped => write!(f, "skipped"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Cancelled | Self::Failed
        )
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Why a stage was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage's fingerprint matches the last successful run.
    Unchanged,
    /// An optional stage's tool is not installed.
    ToolUnavailable {
        /// The missing tool.
        tool: String,
    },
    /// The stage had no work, such as a formatter with no source files.
    NothingToDo {
        /// What was missing.
        reason: String,
    },
}

impl SkipReason {
    /// Returns true if dependents may treat the skipped stage as satisfied.
    ///
    /// Only an unchanged stage left valid outputs behind.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::ToolUnavailable { tool } => write!(f, "tool '{tool}' not available"),
            Self::NothingToDo { reason } => write!(f, "nothing to do: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(StageStatus::Cancelled.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Succeeded);
    }

    #[test]
    fn test_only_unchanged_skip_satisfies_dependents() {
        assert!(SkipReason::Unchanged.satisfies_dependents());
        assert!(!SkipReason::NothingToDo { reason: "no sources".into() }.satisfies_dependents());
        assert!(!SkipReason::ToolUnavailable { tool: "lcov".into() }.satisfies_dependents());
    }

    #[test]
    fn test_skip_reason_serialize() {
        let json = serde_json::to_string(&SkipReason::ToolUnavailable { tool: "lcov".into() }).unwrap();
        assert_eq!(json, r#"{"kind":"tool_unavailable","tool":"lcov"}"#);
    }
}
