use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ExecError, Result};

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "/bin/sh";

// ─── Results ──────────────────────────────────────────────────────────────

/// What a finished command left behind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResponse {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResponse {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// How a command run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command exited on its own. A non-zero code still lands here.
    Completed(ExecResponse),
    /// The command was killed after cancellation; the response holds
    /// whatever output was produced before that.
    Cancelled(ExecResponse),
}

impl ExecOutcome {
    pub fn response(&self) -> &ExecResponse {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }

    pub fn into_response(self) -> ExecResponse {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

// ─── RunParams ────────────────────────────────────────────────────────────

/// A shell command line plus the environment it runs in.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Script text handed to `<shell> -c`.
    pub commands: String,
    pub shell: PathBuf,
    /// Start from the current process environment before applying `environment`.
    pub inherit_env: bool,
    pub environment: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl RunParams {
    pub fn new(commands: impl Into<String>) -> Self {
        Self {
            commands: commands.into(),
            shell: PathBuf::from(DEFAULT_SHELL),
            inherit_env: true,
            environment: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Spawn the command without waiting for it.
    ///
    /// On Unix the shell becomes the leader of a new process group so that
    /// cancellation reaches anything it forks.
    pub fn start(&self) -> Result<RunningCommand> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.commands);

        if !self.inherit_env {
            cmd.env_clear();
        }
        for (k, v) in &self.environment {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecError::Start {
            command: self.commands.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(ExecError::Capture("stdout"))?;
        let stderr = child.stderr.take().ok_or(ExecError::Capture("stderr"))?;

        tracing::debug!(pid = ?child.id(), command = %self.commands, "command started");

        Ok(RunningCommand {
            child,
            stdout: tokio::spawn(read_all(stdout)),
            stderr: tokio::spawn(read_all(stderr)),
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

// ─── RunningCommand ───────────────────────────────────────────────────────

/// A spawned command whose output is being drained in the background.
#[derive(Debug)]
pub struct RunningCommand {
    child: Child,
    stdout: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<std::io::Result<Vec<u8>>>,
}

impl RunningCommand {
    /// Wait for the command to exit on its own.
    pub async fn wait(self) -> Result<ExecResponse> {
        let Self {
            mut child,
            stdout,
            stderr,
        } = self;
        drain(&mut child, stdout, stderr).await
    }

    /// Wait for the command to finish, killing it if `cancel` fires first.
    ///
    /// The command is finished once the shell has exited and both output
    /// pipes are closed, so a background process still holding a pipe keeps
    /// the race open. Cancellation is advisory: the process group is killed
    /// once and the call then waits for the pipes to close before returning
    /// the partial output.
    pub async fn wait_with_cancel(self, cancel: CancellationToken) -> Result<ExecOutcome> {
        let Self {
            mut child,
            stdout,
            stderr,
        } = self;
        // Taken before the shell is reaped; the group outlives its leader.
        let pid = child.id();

        let done = drain(&mut child, stdout, stderr);
        tokio::pin!(done);

        tokio::select! {
            biased;
            resp = &mut done => return resp.map(ExecOutcome::Completed),
            _ = cancel.cancelled() => {}
        }

        match pid {
            Some(pid) => {
                if let Err(e) = kill_process_group(pid) {
                    tracing::debug!(pid, error = %e, "process group kill failed");
                }
            }
            None => tracing::debug!("no pid to signal"),
        }
        let resp = done.await?;
        tracing::debug!(code = resp.code, "cancelled command reaped");
        Ok(ExecOutcome::Cancelled(resp))
    }
}

/// Reap the shell, then collect everything written to both pipes.
async fn drain(
    child: &mut Child,
    stdout: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<ExecResponse> {
    let status = child.wait().await?;
    let stdout = stdout.await??;
    let stderr = stderr.await??;
    Ok(ExecResponse {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: killpg takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let resp = RunParams::new("echo hi").start().unwrap().wait().await.unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.stdout, b"hi\n");
        assert!(resp.stderr.is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let resp = RunParams::new("echo oops >&2; exit 3")
            .start()
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(resp.code, 3);
        assert_eq!(resp.stderr_lossy(), "oops\n");
    }

    #[tokio::test]
    async fn missing_shell_fails_to_start() {
        let err = RunParams::new("echo hi")
            .with_shell("/nonexistent/shell-xyz")
            .start()
            .unwrap_err();
        assert!(matches!(err, ExecError::Start { .. }), "got {err:?}");
        assert!(err.to_string().contains("echo hi"));
    }

    #[tokio::test]
    async fn environment_and_working_dir_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let resp = RunParams::new("printf '%s:' \"$GREETING\"; pwd -P")
            .with_env("GREETING", "hello")
            .with_working_dir(dir.path())
            .start()
            .unwrap()
            .wait()
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(
            resp.stdout_lossy(),
            format!("hello:{}\n", canonical.display())
        );
    }

    #[tokio::test]
    async fn cleared_environment_hides_parent_vars() {
        std::env::set_var("COMMAND_EXEC_PARENT_VAR", "visible");
        let resp = RunParams::new("printf '%s' \"$COMMAND_EXEC_PARENT_VAR\"")
            .inherit_env(false)
            .start()
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(resp.stdout.is_empty());
    }

    #[tokio::test]
    async fn cancel_kills_and_returns_partial_output() {
        let running = RunParams::new("echo partial; sleep 5").start().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let outcome = running.wait_with_cancel(cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.response().stdout, b"partial\n");
        assert_eq!(outcome.response().code, -1);
    }

    #[tokio::test]
    async fn cancel_reaches_background_children() {
        // The backgrounded sleep inherits the output pipes; without a group
        // kill the readers would block until it exits.
        let running = RunParams::new("sleep 5 & sleep 5").start().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(3), running.wait_with_cancel(cancel))
            .await
            .expect("cancelled command should be reaped promptly")
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_after_shell_exits_still_kills_background_child() {
        // The shell exits at once; only the background sleep keeps the
        // pipes open when the token fires.
        let running = RunParams::new("sleep 5 & echo hi").start().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let outcome = running.wait_with_cancel(cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.response().stdout, b"hi\n");
    }

    #[tokio::test]
    async fn background_child_output_is_part_of_completion() {
        let running = RunParams::new("(sleep 0.2; echo late) & echo early")
            .start()
            .unwrap();
        let outcome = running
            .wait_with_cancel(CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_cancelled());
        assert_eq!(outcome.response().stdout_lossy(), "early\nlate\n");
    }

    #[tokio::test]
    async fn completion_wins_when_not_cancelled() {
        let running = RunParams::new("echo done").start().unwrap();
        let outcome = running
            .wait_with_cancel(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::Completed(ExecResponse {
                code: 0,
                stdout: b"done\n".to_vec(),
                stderr: vec![],
            })
        );
    }
}
