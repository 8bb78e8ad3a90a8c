//! Process Supervisor — runs shell commands with timeout enforcement,
//! rejects interactive programs, demotes server-style commands to the
//! background, and streams a `commands.log` per run.
//!
//! Each child runs in its own Unix process group (`process_group(0)`, as
//! the verifier pipeline's `run_with_timeout` also does) so a timeout can
//! be escalated to the whole tree: SIGTERM first, then `GRACE_PERIOD_SECS`
//! to exit on its own, then SIGKILL. `kill_on_drop` remains a backstop for
//! the case where the supervisor itself is dropped mid-command.

mod classify;
mod types;

pub use classify::{is_interactive_command, is_server_command};
pub use types::{
    CommandResult, ExecOptions, ProcessId, ProcessStatus, DEFAULT_TIMEOUT_SECS,
    GRACE_PERIOD_SECS,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown process id: {0}")]
    UnknownProcess(ProcessId),
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("io error writing {path}: {source}")]
    Log {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

struct BackgroundProcess {
    child: Mutex<Option<Child>>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    status: Mutex<ProcessStatus>,
    exit_code: Mutex<Option<i32>>,
}

/// Runs and tracks commands for one orchestrator process. Background
/// processes are kept in an in-memory registry keyed by `ProcessId`; this
/// does not survive restart, matching the spec's "best-effort" framing for
/// `killAll`.
pub struct ProcessSupervisor {
    processes: Mutex<HashMap<ProcessId, Arc<BackgroundProcess>>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Run `argv` to completion (or rejection, or timeout) and return a
    /// `CommandResult`. `argv[0]` is the program, the rest are arguments.
    pub async fn execute(&self, argv: &[String], opts: ExecOptions) -> SupervisorResult<CommandResult> {
        if argv.is_empty() {
            return Ok(CommandResult::rejected("empty_command"));
        }

        if is_interactive_command(argv) {
            let result = CommandResult::rejected("interactive_command");
            self.log(&opts, argv, "[REJECTED: interactive_command]", None).await;
            return Ok(result);
        }

        if is_server_command(argv) {
            let process_id = self.execute_background(argv, opts.clone()).await?;
            return Ok(CommandResult::backgrounded(process_id));
        }

        let start = Instant::now();
        let timeout = Duration::from_secs(opts.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let span = info_span!("supervisor.execute", cmd = %argv.join(" "), cwd = ?opts.cwd);

        let result = async {
            let mut cmd = build_command(argv, &opts);
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    warn!(error = %e, "failed to spawn command");
                    return CommandResult::rejected(&format!("spawn_failed: {e}"));
                }
            };

            let stdout_buf = Arc::new(Mutex::new(String::new()));
            let stderr_buf = Arc::new(Mutex::new(String::new()));
            let stdout_task = child.stdout.take().map(|s| spawn_reader(s, stdout_buf.clone()));
            let stderr_task = child.stderr.take().map(|s| spawn_reader(s, stderr_buf.clone()));

            let outcome = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(Some(e)),
                Err(_) => {
                    terminate_child(&mut child).await;
                    Err(None)
                }
            };

            // the child's exit closes its end of the pipes; give the reader
            // tasks a moment to drain whatever is left before reading the buffers.
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            match outcome {
                Ok(status) => CommandResult {
                    exit_code: status.code(),
                    stdout: stdout_buf.lock().await.clone(),
                    stderr: stderr_buf.lock().await.clone(),
                    timed_out: false,
                    ..Default::default()
                },
                Err(Some(e)) => {
                    warn!(error = %e, "failed to wait on command");
                    CommandResult::rejected(&format!("wait_failed: {e}"))
                }
                Err(None) => {
                    CommandResult::timed_out(stdout_buf.lock().await.clone(), stderr_buf.lock().await.clone())
                }
            }
        }
        .instrument(span)
        .await;

        let status_tag = if result.timed_out {
            "[TIMEOUT]".to_string()
        } else {
            format!("[exit: {}]", result.exit_code.unwrap_or(-1))
        };
        self.log(&opts, argv, &status_tag, Some(start.elapsed())).await;

        Ok(result)
    }

    /// Spawn `argv` detached and return a handle. The Supervisor itself
    /// calls this for commands classified as server-style.
    pub async fn execute_background(
        &self,
        argv: &[String],
        opts: ExecOptions,
    ) -> SupervisorResult<ProcessId> {
        let mut cmd = build_command(argv, &opts);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let process_id = uuid::Uuid::new_v4().to_string();

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, stdout_buf.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, stderr_buf.clone());
        }

        let process = Arc::new(BackgroundProcess {
            child: Mutex::new(Some(child)),
            stdout: stdout_buf,
            stderr: stderr_buf,
            status: Mutex::new(ProcessStatus::Running),
            exit_code: Mutex::new(None),
        });

        self.processes
            .lock()
            .await
            .insert(process_id.clone(), process);

        self.log(&opts, argv, &format!("[background: {process_id}]"), None)
            .await;

        Ok(process_id)
    }

    pub async fn kill(&self, process_id: &str) -> SupervisorResult<()> {
        let process = self.lookup(process_id).await?;
        let mut guard = process.child.lock().await;
        if let Some(child) = guard.as_mut() {
            let _ = child.start_kill();
            *process.status.lock().await = ProcessStatus::Stopped;
        }
        Ok(())
    }

    pub async fn get_process_status(&self, process_id: &str) -> SupervisorResult<ProcessStatus> {
        let process = self.lookup(process_id).await?;
        self.refresh_status(&process).await;
        Ok(*process.status.lock().await)
    }

    pub async fn get_process_output(&self, process_id: &str) -> SupervisorResult<(String, String)> {
        let process = self.lookup(process_id).await?;
        Ok((
            process.stdout.lock().await.clone(),
            process.stderr.lock().await.clone(),
        ))
    }

    /// Best-effort terminate every tracked background process, ignoring
    /// ones that have already exited.
    pub async fn kill_all(&self) {
        let processes: Vec<Arc<BackgroundProcess>> =
            self.processes.lock().await.values().cloned().collect();
        for process in processes {
            let mut guard = process.child.lock().await;
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
            *process.status.lock().await = ProcessStatus::Stopped;
        }
    }

    async fn lookup(&self, process_id: &str) -> SupervisorResult<Arc<BackgroundProcess>> {
        self.processes
            .lock()
            .await
            .get(process_id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownProcess(process_id.to_string()))
    }

    async fn refresh_status(&self, process: &Arc<BackgroundProcess>) {
        let mut guard = process.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    *process.exit_code.lock().await = exit.code();
                    *process.status.lock().await = ProcessStatus::Exited;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to poll background process"),
            }
        }
    }

    async fn log(&self, opts: &ExecOptions, argv: &[String], status: &str, elapsed: Option<Duration>) {
        let Some(run_dir) = &opts.run_dir else {
            return;
        };
        let path = run_dir.join("commands.log");
        let cwd = opts
            .cwd
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let timing = elapsed
            .map(|d| format!(" [{}ms]", d.as_millis()))
            .unwrap_or_default();
        let line = format!(
            "{} {} cwd={} {}{}\n",
            Utc::now().to_rfc3339(),
            argv.join(" "),
            cwd,
            status,
            timing
        );

        if let Some(parent) = path.parent() {
            if let Err(source) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %source, "failed to create run dir for commands.log");
                return;
            }
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;

        if let Err(source) = result {
            warn!(path = %path.display(), error = %source, "failed to append to commands.log");
        }
    }
}

fn build_command(argv: &[String], opts: &ExecOptions) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd.kill_on_drop(true);
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &opts.env {
        cmd.env(k, v);
    }
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Escalate a timed-out child: SIGTERM the whole process group, give it
/// `GRACE_PERIOD_SECS` to exit on its own, then SIGKILL if it hasn't.
#[cfg(unix)]
async fn terminate_child(child: &mut tokio::process::Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        let _ = child.wait().await;
        return;
    };
    // `build_command` puts the child in its own process group via
    // `process_group(0)`; signalling `-pid` reaches the whole tree.
    let pgid = Pid::from_raw(-(pid as i32));
    let _ = signal::kill(pgid, Signal::SIGTERM);

    let grace = Duration::from_secs(GRACE_PERIOD_SECS);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid, "process still alive after SIGTERM grace period, sending SIGKILL");
        let _ = signal::kill(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

#[cfg(windows)]
async fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn spawn_reader<R>(mut reader: R, buf: Arc<Mutex<String>>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut guard = buf.lock().await;
                    guard.push_str(&String::from_utf8_lossy(&chunk[..n]));
                }
                Err(_) => break,
            }
        }
    })
}
