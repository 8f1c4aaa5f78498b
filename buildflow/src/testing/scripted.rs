//! A process runner that replays scripted outcomes.

use crate::cancellation::CancellationToken;
use crate::errors::ProcessError;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Exit(i32),
    LaunchError(String),
    Timeout,
    Hang,
}

/// The scripted behavior of one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    outcome: Outcome,
    delay: Duration,
    stdout: String,
    stderr: String,
}

impl Script {
    /// Exits with code 0.
    #[must_use]
    pub fn succeed() -> Self {
        Self::exit(0)
    }

    /// Exits with `code`.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            outcome: Outcome::Exit(code),
            delay: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Fails to launch with `message`.
    #[must_use]
    pub fn launch_error(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::LaunchError(message.into()),
            ..Self::succeed()
        }
    }

    /// Reports a timeout once the delay elapses.
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            outcome: Outcome::Timeout,
            ..Self::succeed()
        }
    }

    /// Runs until cancelled.
    #[must_use]
    pub fn hang() -> Self {
        Self {
            outcome: Outcome::Hang,
            ..Self::succeed()
        }
    }

    /// Waits `delay` before producing the outcome.
    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the captured stdout.
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Sets the captured stderr.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::succeed()
    }
}

/// A [`ProcessRunner`] that replays scripts keyed by program name.
///
/// Programs without a script succeed immediately.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    fallback: Script,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct RunningGuard<'a> {
    running: &'a AtomicUsize,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { running }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedRunner {
    /// Creates a runner where every program succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `program`.
    #[must_use]
    pub fn with_script(self, program: impl Into<String>, script: Script) -> Self {
        self.set_script(program, script);
        self
    }

    /// Sets the script used for programs without one.
    #[must_use]
    pub fn with_fallback(mut self, script: Script) -> Self {
        self.fallback = script;
        self
    }

    /// Marks `tool` as not installed.
    #[must_use]
    pub fn with_missing_tool(self, tool: impl Into<String>) -> Self {
        self.missing.lock().insert(tool.into());
        self
    }

    /// Replaces the script for `program`.
    pub fn set_script(&self, program: impl Into<String>, script: Script) {
        self.scripts.lock().insert(program.into(), script);
    }

    /// Returns launched programs in launch order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns how many times `program` was launched.
    #[must_use]
    pub fn call_count(&self, program: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == program).count()
    }

    /// Returns true if `program` was launched at least once.
    #[must_use]
    pub fn was_called(&self, program: &str) -> bool {
        self.call_count(program) > 0
    }

    /// Returns the largest number of programs that ran at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Clears recorded calls and the concurrency peak.
    pub fn reset(&self) {
        self.calls.lock().clear();
        self.peak.store(0, Ordering::SeqCst);
    }

    fn script_for(&self, program: &str) -> Script {
        self.scripts
            .lock()
            .get(program)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn cancelled(command: &CommandSpec, token: &CancellationToken) -> ProcessError {
    ProcessError::Cancelled {
        program: command.program.clone(),
        reason: token.reason().unwrap_or_default(),
    }
}

fn launch_error(command: &CommandSpec, message: &str) -> ProcessError {
    ProcessError::launch(
        command.program.clone(),
        io::Error::new(io::ErrorKind::NotFound, message.to_string()),
    )
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        token: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if token.is_cancelled() {
            return Err(cancelled(command, token));
        }
        let script = self.script_for(&command.program);
        if let Outcome::LaunchError(message) = &script.outcome {
            return Err(launch_error(command, message));
        }

        self.calls.lock().push(command.program.clone());
        let _running = RunningGuard::enter(&self.running, &self.peak);
        let started = Instant::now();

        tokio::select! {
            () = tokio::time::sleep(script.delay) => {}
            () = token.cancelled() => return Err(cancelled(command, token)),
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match script.outcome {
            Outcome::Exit(code) => Ok(ProcessOutput {
                exit_code: Some(code),
                stdout: script.stdout,
                stderr: script.stderr,
                duration_ms: elapsed_ms,
            }),
            Outcome::Timeout => Err(ProcessError::Timeout {
                program: command.program.clone(),
                timeout_ms: command.timeout_ms.unwrap_or(elapsed_ms),
                elapsed_ms,
                stdout: script.stdout,
                stderr: script.stderr,
            }),
            Outcome::Hang => {
                token.cancelled().await;
                Err(cancelled(command, token))
            }
            Outcome::LaunchError(message) => Err(launch_error(command, &message)),
        }
    }

    fn is_available(&self, tool: &str, _command: &CommandSpec) -> bool {
        !self.missing.lock().contains(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_default_script_succeeds() {
        let runner = ScriptedRunner::new();
        let output = runner
            .run(&CommandSpec::new("make"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(runner.calls(), vec!["make".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_exit_and_output() {
        let runner = ScriptedRunner::new()
            .with_script("cc", Script::exit(2).with_stderr("undefined symbol"));
        let output = runner
            .run(&CommandSpec::new("cc"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(2));
        assert_eq!(output.stderr, "undefined symbol");
    }

    #[tokio::test]
    async fn test_launch_error_is_not_recorded_as_call() {
        let runner = ScriptedRunner::new().with_script("cpack", Script::launch_error("not found"));
        let err = runner
            .run(&CommandSpec::new("cpack"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
        assert!(!runner.was_called("cpack"));
    }

    #[tokio::test]
    async fn test_hang_ends_on_cancel() {
        let runner = Arc::new(ScriptedRunner::new().with_script("server", Script::hang()));
        let token = Arc::new(CancellationToken::new());

        let task = {
            let runner = Arc::clone(&runner);
            let token = Arc::clone(&token);
            tokio::spawn(async move { runner.run(&CommandSpec::new("server"), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel("stop");

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(runner.peak_concurrency(), 1);
    }

    #[test]
    fn test_missing_tool() {
        let runner = ScriptedRunner::new().with_missing_tool("clang-tidy");
        assert!(!runner.is_available("clang-tidy", &CommandSpec::new("clang-tidy")));
        assert!(runner.is_available("cmake", &CommandSpec::new("cmake")));
    }
}
