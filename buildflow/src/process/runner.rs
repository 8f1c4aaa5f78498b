//! Process runner trait and the tokio implementation.

use super::{find_executable, BaseEnvironment, CommandSpec, ProcessOutput};
use crate::cancellation::CancellationToken;
use crate::errors::ProcessError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// How long to keep reading output after a normal exit.
///
/// A background grandchild may keep the pipes open; past this point the
/// output collected so far is returned.
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(5);

/// How long to keep reading output after the process group was killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(500);

/// Runs external commands.
///
/// A non-zero exit is a normal `Ok` result; only failures to launch or
/// supervise the process are errors.
#[async_trait]
pub trait ProcessRunner: Send + Sync + fmt::Debug {
    /// Runs `command` to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Launch`] when the executable cannot be found or started
    /// - [`ProcessError::Timeout`] when the timeout elapses (the process is killed)
    /// - [`ProcessError::Cancelled`] when `token` fires (the process is killed)
    async fn run(
        &self,
        command: &CommandSpec,
        token: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Returns true if `tool` can be launched for `command`.
    ///
    /// `tool` is resolved the way [`run`](Self::run) resolves the program:
    /// against the command's working directory and its `PATH`.
    fn is_available(&self, tool: &str, command: &CommandSpec) -> bool;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    base_env: BaseEnvironment,
    default_cwd: PathBuf,
    default_timeout: Option<Duration>,
}

impl SystemProcessRunner {
    /// Creates a runner rooted at `default_cwd` with the default base environment.
    #[must_use]
    pub fn new(default_cwd: impl Into<PathBuf>) -> Self {
        Self {
            base_env: BaseEnvironment::capture_default(),
            default_cwd: default_cwd.into(),
            default_timeout: None,
        }
    }

    /// Replaces the base environment.
    #[must_use]
    pub fn with_base_env(mut self, base_env: BaseEnvironment) -> Self {
        self.base_env = base_env;
        self
    }

    /// Sets the timeout for commands that do not declare one.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Returns the base environment.
    #[must_use]
    pub fn base_env(&self) -> &BaseEnvironment {
        &self.base_env
    }

    /// Returns the default working directory.
    #[must_use]
    pub fn default_cwd(&self) -> &Path {
        &self.default_cwd
    }

    fn working_dir(&self, command: &CommandSpec) -> PathBuf {
        match &command.cwd {
            Some(cwd) if cwd.is_absolute() => cwd.clone(),
            Some(cwd) => self.default_cwd.join(cwd),
            None => self.default_cwd.clone(),
        }
    }

    fn child_env(&self, command: &CommandSpec) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .base_env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.extend(command.env.clone());
        env
    }
}

/// Resolves a program against `path_var`, anchoring relative paths at `cwd`.
fn resolve_program(program: &str, path_var: Option<&str>, cwd: &Path) -> Option<PathBuf> {
    let has_separator = program.contains('/') || program.contains(std::path::MAIN_SEPARATOR);
    if has_separator && Path::new(program).is_relative() {
        let anchored = cwd.join(program);
        return find_executable(&anchored.to_string_lossy(), None);
    }
    find_executable(program, path_var)
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        token: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if token.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: command.program.clone(),
                reason: token.reason().unwrap_or_default(),
            });
        }

        let cwd = self.working_dir(command);
        let env = self.child_env(command);
        let resolved = resolve_program(
            &command.program,
            env.get("PATH").map(String::as_str),
            &cwd,
        )
        .ok_or_else(|| {
            ProcessError::launch(
                &command.program,
                std::io::Error::new(std::io::ErrorKind::NotFound, "executable not found"),
            )
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&command.args)
            .current_dir(&cwd)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(program = %resolved.display(), cwd = ?cwd, args = ?command.args, "spawning process");

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::launch(&command.program, e))?;
        let pid = child.id();
        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let limit = command
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout);
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e),
            },
            limit = deadline => Outcome::TimedOut(limit),
            () = token.cancelled() => Outcome::Cancelled,
        };

        let status = match outcome {
            Outcome::Exited(status) => status,
            Outcome::WaitFailed(source) => {
                let _ = abort(&mut child, pid, stdout, stderr).await;
                return Err(ProcessError::Io {
                    program: command.program.clone(),
                    source,
                });
            }
            Outcome::TimedOut(limit) => {
                let (stdout, stderr) = abort(&mut child, pid, stdout, stderr).await;
                return Err(ProcessError::Timeout {
                    program: command.program.clone(),
                    timeout_ms: millis(limit),
                    elapsed_ms: millis(started.elapsed()),
                    stdout,
                    stderr,
                });
            }
            Outcome::Cancelled => {
                let _ = abort(&mut child, pid, stdout, stderr).await;
                return Err(ProcessError::Cancelled {
                    program: command.program.clone(),
                    reason: token.reason().unwrap_or_default(),
                });
            }
        };

        let output = ProcessOutput {
            exit_code: status.code(),
            stdout: stdout.finish(DRAIN_AFTER_EXIT).await,
            stderr: stderr.finish(DRAIN_AFTER_EXIT).await,
            duration_ms: millis(started.elapsed()),
        };
        debug!(
            program = %command.program,
            exit_code = ?output.exit_code,
            duration_ms = output.duration_ms,
            "process exited"
        );
        Ok(output)
    }

    fn is_available(&self, tool: &str, command: &CommandSpec) -> bool {
        let env = self.child_env(command);
        resolve_program(
            tool,
            env.get("PATH").map(String::as_str),
            &self.working_dir(command),
        )
        .is_some()
    }
}

/// Kills the process group and returns the output captured up to that point.
async fn abort(
    child: &mut Child,
    pid: Option<u32>,
    stdout: Capture,
    stderr: Capture,
) -> (String, String) {
    terminate(child, pid).await;
    (
        stdout.finish(DRAIN_AFTER_KILL).await,
        stderr.finish(DRAIN_AFTER_KILL).await,
    )
}

/// Kills the child and, on Unix, its whole process group.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            debug!(pgid, error = %e, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed");
    }
}

/// Reads a pipe into a shared buffer so partial output survives an abort.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handle = reader.map(|mut reader| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!(error = %e, "output pipe read failed");
                            break;
                        }
                    }
                }
            })
        });
        Self { buffer, handle }
    }

    async fn finish(self, drain: Duration) -> String {
        if let Some(mut handle) = self.handle {
            if tokio::time::timeout(drain, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
