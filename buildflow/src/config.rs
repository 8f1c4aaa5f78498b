//! Project configuration.
//!
//! Loaded from `buildflow.json` in the project root. Every field has a
//! default, so a missing file or a partial file is fine; a malformed file is
//! a configuration error.

use crate::errors::BuildflowError;
use crate::incremental::IncrementalTracker;
use crate::pipeline::{default_concurrency, ExecutionPolicy, FailureMode};
use crate::process::{BaseEnvironment, SystemProcessRunner, DEFAULT_PASSTHROUGH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the config file in the project root.
pub const CONFIG_FILE: &str = "buildflow.json";

fn default_state_dir() -> PathBuf {
    PathBuf::from(".buildflow")
}

fn default_fingerprint_file() -> String {
    "fingerprints.json".to_string()
}

fn default_env_passthrough() -> Vec<String> {
    DEFAULT_PASSTHROUGH.iter().map(ToString::to_string).collect()
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_source_globs() -> Vec<String> {
    ["src/**/*.{c,cc,cpp,cxx,h,hh,hpp,hxx}", "include/**/*.{h,hh,hpp,hxx}"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_exclude_globs() -> Vec<String> {
    vec!["build/**".to_string(), ".buildflow/**".to_string()]
}

fn default_benchmark_binary() -> PathBuf {
    PathBuf::from("bin/benchmark")
}

/// Settings read from `buildflow.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildflowConfig {
    /// Directory for orchestrator state, relative to the project root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Fingerprint store file name inside `state_dir`.
    #[serde(default = "default_fingerprint_file")]
    pub fingerprint_file: String,
    /// Maximum number of stages running at once; CPU count when unset.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Failure mode.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Timeout applied to stages that declare none.
    #[serde(default)]
    pub default_timeout_seconds: Option<u64>,
    /// Variables copied from the orchestrator's environment into every stage.
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Extra variables set for every stage.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// CMake build directory, relative to the project root.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    /// Globs selecting the project's source files.
    #[serde(default = "default_source_globs")]
    pub source_globs: Vec<String>,
    /// Globs removed from `source_globs` matches.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    /// Benchmark executable, relative to the build directory.
    #[serde(default = "default_benchmark_binary")]
    pub benchmark_binary: PathBuf,
}

impl Default for BuildflowConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            fingerprint_file: default_fingerprint_file(),
            max_concurrency: None,
            failure_mode: FailureMode::default(),
            default_timeout_seconds: None,
            env_passthrough: default_env_passthrough(),
            env: BTreeMap::new(),
            build_dir: default_build_dir(),
            source_globs: default_source_globs(),
            exclude_globs: default_exclude_globs(),
            benchmark_binary: default_benchmark_binary(),
        }
    }
}

impl BuildflowConfig {
    /// Loads `buildflow.json` from `root`, or the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BuildflowError::Config`] if the file cannot be read, is not
    /// valid JSON for this struct, or fails validation.
    pub fn load(root: &Path) -> Result<Self, BuildflowError> {
        let path = root.join(CONFIG_FILE);
        let config = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                BuildflowError::Config(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(BuildflowError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`BuildflowError::Config`] listing every problem found.
    pub fn validate(&self) -> Result<(), BuildflowError> {
        let mut errors = Vec::new();
        if self.max_concurrency == Some(0) {
            errors.push("max_concurrency must be greater than 0");
        }
        if self.default_timeout_seconds == Some(0) {
            errors.push("default_timeout_seconds must be greater than 0");
        }
        if self.fingerprint_file.trim().is_empty() {
            errors.push("fingerprint_file must not be empty");
        }
        if self.source_globs.is_empty() {
            errors.push("source_globs must not be empty");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BuildflowError::Config(errors.join("; ")))
        }
    }

    /// Returns the fingerprint store path relative to the project root.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(&self.fingerprint_file)
    }

    /// Builds the execution policy from the config values.
    #[must_use]
    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::default()
            .with_max_concurrency(self.max_concurrency.unwrap_or_else(default_concurrency))
            .with_failure_mode(self.failure_mode)
    }

    /// Captures the base environment: the pass-through variables plus `env`.
    #[must_use]
    pub fn base_environment(&self) -> BaseEnvironment {
        BaseEnvironment::capture(&self.env_passthrough).with_vars(self.env.clone())
    }

    /// Builds a process runner rooted at `root`.
    #[must_use]
    pub fn runner(&self, root: &Path) -> SystemProcessRunner {
        let runner = SystemProcessRunner::new(root).with_base_env(self.base_environment());
        match self.default_timeout_seconds {
            Some(secs) => runner.with_default_timeout(Duration::from_secs(secs)),
            None => runner,
        }
    }

    /// Opens the incremental tracker for the project at `root`.
    #[must_use]
    pub fn tracker(&self, root: &Path) -> IncrementalTracker {
        IncrementalTracker::open(root, self.store_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = BuildflowConfig::load(dir.path()).unwrap();

        assert_eq!(config, BuildflowConfig::default());
        assert_eq!(config.store_path(), PathBuf::from(".buildflow/fingerprints.json"));
        assert!(config.env_passthrough.contains(&"PATH".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "max_concurrency": 3, "failure_mode": "continue-on-error", "env": { "CC": "clang" } }"#,
        )
        .unwrap();

        let config = BuildflowConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_concurrency, Some(3));
        assert_eq!(config.build_dir, PathBuf::from("build"));

        let policy = config.policy();
        assert_eq!(policy.max_concurrency, 3);
        assert_eq!(policy.failure_mode, FailureMode::ContinueOnError);
        assert_eq!(config.base_environment().get("CC"), Some("clang"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();

        let err = BuildflowConfig::load(dir.path()).unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(err.exit_code(), crate::errors::exit_codes::CONFIGURATION);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "max_concurency": 2 }"#).unwrap();
        assert!(BuildflowConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_validation_collects_errors() {
        let config = BuildflowConfig {
            max_concurrency: Some(0),
            default_timeout_seconds: Some(0),
            ..BuildflowConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_concurrency"));
        assert!(err.contains("default_timeout_seconds"));
    }
}
