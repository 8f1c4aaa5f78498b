//! Execution policy.

use super::FailureMode;
use serde::{Deserialize, Serialize};

/// Returns the number of CPUs available to this process, at least 1.
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Scheduling knobs for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Maximum number of stages running at once.
    pub max_concurrency: usize,
    /// What a required stage failure does to the rest of the run.
    pub failure_mode: FailureMode,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl ExecutionPolicy {
    /// Sets the concurrency limit; values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Returns the effective concurrency limit (never 0).
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = ExecutionPolicy::default();
        assert!(policy.max_concurrency >= 1);
        assert_eq!(policy.failure_mode, FailureMode::FailFast);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let policy = ExecutionPolicy::default().with_max_concurrency(0);
        assert_eq!(policy.concurrency(), 1);

        let raw = ExecutionPolicy {
            max_concurrency: 0,
            failure_mode: FailureMode::ContinueOnError,
        };
        assert_eq!(raw.concurrency(), 1);
    }
}
