//! Worker process lifecycle management.
//!
//! Handles spawning, liveness checks, stderr capture, and termination of the
//! worker child process. The worker communicates via JSON-RPC over its stdio;
//! this module only owns the process itself; the streams go to the transport.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum stderr bytes retained for diagnostics (the most recent output).
const MAX_STDERR_BYTES: usize = 2000;

/// How long to wait for the stderr drain to reach EOF when collecting it.
const STDERR_COLLECT_WAIT: Duration = Duration::from_millis(500);

// ─── WorkerProcess ───────────────────────────────────────────────────────────

/// A spawned worker with its stdio handed out separately.
pub struct SpawnedWorker {
    pub process: WorkerProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// A running worker process.
pub struct WorkerProcess {
    /// Human-readable worker name (e.g., "calculator").
    pub name: String,
    /// The child process handle. Killed on drop as a last resort.
    child: Child,
    stderr: StderrCapture,
    /// Set once the process has been reaped.
    exit_status: Option<ExitStatus>,
    /// Set once `terminate` has run to completion.
    terminated: bool,
}

impl WorkerProcess {
    /// OS process id, if the process has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the worker process is still running. Never blocks.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() || self.terminated {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(worker = %self.name, status = %status, "worker exited");
                self.exit_status = Some(status);
                false
            }
            Err(e) => {
                tracing::warn!(worker = %self.name, error = %e, "failed to poll worker status");
                false
            }
        }
    }

    /// Exit status, if the process has exited and been observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Captured stderr output (at most the last 2000 bytes).
    ///
    /// If the worker has exited this waits briefly for the drain task to
    /// observe EOF, so output written just before exit is included.
    pub async fn stderr_output(&mut self) -> String {
        self.stderr.collect(STDERR_COLLECT_WAIT).await
    }

    /// Stop the worker and reap it.
    ///
    /// The worker is expected to exit once its stdin is closed. If it is still
    /// running after half of `grace`, it is sent SIGTERM (on unix) and given
    /// the other half before being killed. Safe to call any number of times;
    /// later calls return immediately.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.terminated {
            return;
        }

        if self.exit_status.is_none() {
            let first = grace / 2;
            if !self.wait_for_exit(first).await {
                self.request_stop();
                if !self.wait_for_exit(grace - first).await {
                    tracing::warn!(
                        worker = %self.name,
                        grace_ms = grace.as_millis() as u64,
                        "worker did not exit in time, killing"
                    );
                    self.kill_and_reap().await;
                }
            }
        }

        self.terminated = true;
    }

    /// Wait up to `within` for the worker to exit on its own.
    async fn wait_for_exit(&mut self, within: Duration) -> bool {
        match tokio::time::timeout(within, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(worker = %self.name, status = %status, "worker exited");
                self.exit_status = Some(status);
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = %self.name, error = %e, "failed waiting for worker");
                false
            }
            Err(_) => false,
        }
    }

    /// Ask the worker to stop with SIGTERM.
    #[cfg(unix)]
    fn request_stop(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        tracing::info!(worker = %self.name, pid, "sending SIGTERM to worker");
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            tracing::warn!(worker = %self.name, pid, error = %e, "failed to signal worker");
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&self) {}

    async fn kill_and_reap(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(worker = %self.name, error = %e, "failed to kill worker");
        }
        match self.child.wait().await {
            Ok(status) => self.exit_status = Some(status),
            Err(e) => tracing::warn!(worker = %self.name, error = %e, "failed to reap worker"),
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn the worker process with all three standard streams piped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_worker(config: &ServerConfig) -> Result<SpawnedWorker, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.envs(&config.env);

    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    // Never inherit the terminal's streams
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: config.name.clone(),
        reason: format!("{}: {e}", config.command),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: config.name.clone(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: config.name.clone(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr = StderrCapture::start(&config.name, child.stderr.take());

    tracing::info!(
        worker = %config.name,
        command = %config.command,
        args = ?config.args,
        pid = child.id(),
        "spawned worker process"
    );

    Ok(SpawnedWorker {
        process: WorkerProcess {
            name: config.name.clone(),
            child,
            stderr,
            exit_status: None,
            terminated: false,
        },
        stdin,
        stdout,
    })
}

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Drains the worker's stderr in the background so the pipe never fills,
/// keeping the tail for error messages.
struct StderrCapture {
    buffer: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
}

impl StderrCapture {
    fn start(worker: &str, stderr: Option<ChildStderr>) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let Some(stderr) = stderr else {
            return Self { buffer, task: None };
        };

        let sink = Arc::clone(&buffer);
        let worker = worker.to_string();
        let task = tokio::spawn(async move {
            let mut segments = BufReader::new(stderr).split(b'\n');
            while let Ok(Some(bytes)) = segments.next_segment().await {
                let line = String::from_utf8_lossy(&bytes);
                tracing::debug!(worker = %worker, line = %line.trim_end(), "worker stderr");
                if let Ok(mut buf) = sink.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                    truncate_front(&mut buf, MAX_STDERR_BYTES);
                }
            }
        });

        Self {
            buffer,
            task: Some(task),
        }
    }

    async fn collect(&mut self, wait: Duration) -> String {
        if let Some(task) = self.task.as_mut() {
            if tokio::time::timeout(wait, task).await.is_ok() {
                self.task = None;
            }
        }
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }
}

/// Drop bytes from the front of `buf` until it is at most `max` bytes long.
fn truncate_front(buf: &mut String, max: usize) {
    if buf.len() <= max {
        return;
    }
    let mut cut = buf.len() - max;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

// ─── Tests ───────────────────────────────────────────────────────────────────
