//! Stage command descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

/// An external command: program, arguments, working directory, explicit
/// environment additions and an optional timeout.
///
/// The serialized form is part of a stage's fingerprint, so every field that
/// changes what the command does must be serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory. Falls back to the runner's default directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Environment variables added on top of the base environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Timeout in milliseconds. Falls back to the runner's default timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Exit codes treated as success.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout_ms: None,
            success_codes: default_success_codes(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout in milliseconds.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Replaces the accepted exit codes.
    #[must_use]
    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Returns true if `exit_code` counts as success for this command.
    ///
    /// A process killed by a signal has no exit code and never succeeds.
    #[must_use]
    pub fn is_success(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.success_codes.contains(&code))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cmd = CommandSpec::new("cmake")
            .arg("--build")
            .args(["build", "--parallel", "4"])
            .with_cwd("/src")
            .with_env("CC", "clang")
            .with_timeout_ms(1_000);

        assert_eq!(cmd.program, "cmake");
        assert_eq!(cmd.args, vec!["--build", "build", "--parallel", "4"]);
        assert_eq!(cmd.cwd, Some(PathBuf::from("/src")));
        assert_eq!(cmd.env.get("CC"), Some(&"clang".to_string()));
        assert_eq!(cmd.timeout_ms, Some(1_000));
    }

    #[test]
    fn test_success_codes() {
        let cmd = CommandSpec::new("ctest");
        assert!(cmd.is_success(Some(0)));
        assert!(!cmd.is_success(Some(8)));
        assert!(!cmd.is_success(None));

        let lenient = cmd.with_success_codes([0, 8]);
        assert!(lenient.is_success(Some(8)));
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = CommandSpec::new("cmake").args(["-G", "Visual Studio 16 2019"]);
        assert_eq!(cmd.to_string(), "cmake -G \"Visual Studio 16 2019\"");
    }

    #[test]
    fn test_missing_success_codes_default_to_zero() {
        let cmd: CommandSpec = serde_json::from_str(r#"{"program": "make"}"#).unwrap();
        assert_eq!(cmd.success_codes, vec![0]);
        assert!(cmd.args.is_empty());
    }
}
