//! Worker process spawning and shutdown.
//!
//! Spawns one worker per execution with:
//! - `kill_on_drop(true)` so an abandoned execution never leaks a process.
//! - its own process group on unix, so shutdown signals reach everything
//!   the worker started, not just the worker itself.
//! - `env_clear()` + a safe variable allowlist so secrets in the engine's
//!   environment are not visible to the worker.
//! - stdin fed from a background task and then closed, so a worker that
//!   never reads its input cannot deadlock the engine.
//! - stderr drained continuously into a bounded tail buffer.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::worker::codec::WorkerLineCodec;
use crate::worker::payload::LaunchPayload;
use crate::{AppError, Result};

/// Environment variables inherited by the worker process.
///
/// Every other variable is stripped via `env_clear()` before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How long to wait for the stderr drain task once the process is gone.
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a [`WorkerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process is (as far as we know) alive.
    Running,
    /// Shutdown has started.
    Terminating,
    /// Process has exited and been reaped.
    Terminated,
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The process had already exited.
    AlreadyExited,
    /// The process exited after the cooperative termination signal.
    Terminated,
    /// The process had to be force-killed.
    Killed,
}

/// Process-level launch parameters.
#[derive(Debug, Clone, Copy)]
pub struct SpawnSpec<'a> {
    /// Worker binary.
    pub program: &'a str,
    /// Worker arguments.
    pub args: &'a [String],
    /// Validated working directory.
    pub working_dir: &'a Path,
    /// Extra variable names inherited from the engine's environment.
    pub env_passthrough: &'a [String],
    /// Longest accepted stdout line.
    pub max_line_bytes: usize,
    /// Bytes of stderr kept for failure reports.
    pub stderr_tail_bytes: usize,
}

/// A running worker, exclusively owned by one execution.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    child: Child,
    stdout: FramedRead<ChildStdout, WorkerLineCodec>,
    stderr: Option<JoinHandle<String>>,
    state: WorkerState,
}

/// Spawn the worker described by `spec` and hand it `payload`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS cannot create the process or its
/// pipes cannot be captured.
pub fn spawn_worker(spec: &SpawnSpec<'_>, payload: &LaunchPayload) -> Result<WorkerHandle> {
    let mut cmd = Command::new(spec.program);
    cmd.args(spec.args);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    let inherited = ALLOWED_ENV_VARS
        .iter()
        .copied()
        .chain(spec.env_passthrough.iter().map(String::as_str));
    for key in inherited {
        if let Some(val) = std::env::var_os(key) {
            cmd.env(key, val);
        }
    }
    for (key, val) in &payload.env {
        cmd.env(key, val);
    }

    cmd.current_dir(spec.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn worker {}: {err}", spec.program)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stderr".into()))?;

    let pid = child.id();
    info!(pid, program = spec.program, cwd = %spec.working_dir.display(), "worker spawned");

    let input = payload.stdin.clone();
    tokio::spawn(async move {
        if let Err(err) = stdin.write_all(input.as_bytes()).await {
            debug!(pid, %err, "worker closed stdin before reading the launch payload");
            return;
        }
        if let Err(err) = stdin.shutdown().await {
            debug!(pid, %err, "failed to close worker stdin");
        }
    });

    Ok(WorkerHandle {
        pid,
        child,
        stdout: FramedRead::new(stdout, WorkerLineCodec::new(spec.max_line_bytes)),
        stderr: Some(tokio::spawn(drain_stderr(pid, stderr, spec.stderr_tail_bytes))),
        state: WorkerState::Running,
    })
}

impl WorkerHandle {
    /// OS process id, if still known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Next stdout line; `None` at EOF. Cancel-safe.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        self.stdout.next().await
    }

    /// Wait for the process to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the exit status cannot be collected.
    pub async fn wait_exit(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.state = WorkerState::Terminated;
        debug!(pid = self.pid, ?status, "worker exited");
        Ok(status)
    }

    /// Terminate gracefully: signal, wait up to `grace`, then kill.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownOutcome {
        self.state = WorkerState::Terminating;
        let outcome = terminate_gracefully(&mut self.child, grace).await;
        self.state = WorkerState::Terminated;
        outcome
    }

    /// Captured stderr tail. Only meaningful once the process has exited.
    pub async fn stderr_tail(&mut self) -> String {
        let Some(task) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_JOIN_TIMEOUT, task).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(err)) => {
                warn!(pid = self.pid, %err, "stderr drain task failed");
                String::new()
            }
            Err(_) => {
                debug!(pid = self.pid, "stderr still open after exit, report may be partial");
                String::new()
            }
        }
    }
}

/// Send a cooperative termination request to the worker's process group,
/// wait up to `grace` for the worker to exit, then force-kill the group.
/// Always reaps the worker. Descendants still alive once the worker is gone
/// are killed as well.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> ShutdownOutcome {
    let pid = child.id();

    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid, ?status, "worker already exited");
            signal_group(pid, GroupSignal::Kill);
            return ShutdownOutcome::AlreadyExited;
        }
        Ok(None) => {}
        Err(err) => warn!(pid, %err, "failed to poll worker status"),
    }

    if signal_group(pid, GroupSignal::Terminate) {
        info!(pid, ?grace, "sent termination signal to worker group");
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "worker exited after termination signal");
                signal_group(pid, GroupSignal::Kill);
                return ShutdownOutcome::Terminated;
            }
            Ok(Err(err)) => warn!(pid, %err, "error waiting for worker after termination signal"),
            Err(_) => warn!(pid, "worker did not exit within grace period, forcing kill"),
        }
    }

    signal_group(pid, GroupSignal::Kill);
    // `kill` also waits for the process, so it is reaped on return.
    if let Err(err) = child.kill().await {
        warn!(pid, %err, "failed to force-kill worker");
    }
    ShutdownOutcome::Killed
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal the process group led by `pid`. Returns whether the signal was
/// delivered to at least one process.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) if signal == Signal::SIGKILL => false,
        Err(err) => {
            debug!(pid = raw, %err, ?signal, "group signal failed, signalling worker only");
            match kill(Pid::from_raw(raw), signal) {
                Ok(()) => true,
                Err(err) => {
                    warn!(pid = raw, %err, ?signal, "failed to signal worker");
                    false
                }
            }
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) -> bool {
    false
}

/// Read stderr to EOF, logging each line and keeping the last `limit` bytes.
async fn drain_stderr(pid: Option<u32>, stderr: ChildStderr, limit: usize) -> String {
    let mut reader = BufReader::new(stderr);
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(limit.min(64 * 1024));
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                debug!(pid, line = %String::from_utf8_lossy(&line).trim_end(), "worker stderr");
                tail.extend(line.iter().copied());
                let excess = tail.len().saturating_sub(limit);
                tail.drain(..excess);
            }
            Err(err) => {
                debug!(pid, %err, "worker stderr read failed");
                break;
            }
        }
    }

    let bytes: Vec<u8> = tail.into_iter().collect();
    String::from_utf8_lossy(&bytes).trim().to_owned()
}
