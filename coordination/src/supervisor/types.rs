//! Types shared by the Process Supervisor.

use serde::{Deserialize, Serialize};

pub type ProcessId = String;

/// Result of a supervised command execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_process_id: Option<ProcessId>,
}

impl CommandResult {
    pub fn rejected(reason: &str) -> Self {
        Self {
            exit_code: Some(1),
            stderr: format!("command rejected: {reason}"),
            rejected: Some(true),
            rejection_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: Some(124),
            stdout,
            stderr,
            timed_out: true,
            ..Default::default()
        }
    }

    pub fn backgrounded(process_id: ProcessId) -> Self {
        Self {
            exit_code: Some(0),
            background_process_id: Some(process_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Stopped,
    Exited,
}

/// Options accepted by `execute`/`executeBackground`.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<std::path::PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout_seconds: Option<u64>,
    /// Identifies the run for `<runDir>/commands.log`; no log is written
    /// when this is `None`.
    pub run_dir: Option<std::path::PathBuf>,
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const GRACE_PERIOD_SECS: u64 = 5;

/// First-token (basename) sets used by `isInteractiveCommand`/`isServerCommand`.
/// Table-driven so the classification is unit-testable independent of
/// process spawning.
pub const INTERACTIVE_BASENAMES: &[&str] = &[
    "vim", "vi", "nano", "emacs", "less", "more", "man", "top", "htop", "ssh", "telnet", "ftp",
    "sftp", "python", "python3", "irb", "node", "ipython", "psql", "mysql", "sqlite3", "gdb",
    "lldb",
];

/// REPL basenames in `INTERACTIVE_BASENAMES` that are only interactive when
/// invoked *without* a trailing file argument or an eval flag (e.g. `-c`,
/// `-e`).
pub const REPL_BASENAMES: &[&str] = &["python", "python3", "node", "irb", "ipython"];

pub const REPL_NONINTERACTIVE_FLAGS: &[&str] = &["-c", "-e", "--eval", "-m"];

pub const SERVER_BASENAMES: &[&str] = &[
    "npm", "yarn", "pnpm", "bun", "cargo-watch", "docker-compose", "docker", "vite", "webpack-dev-server",
];

/// Second-token markers that, combined with a `SERVER_BASENAMES` first
/// token, indicate a long-running server invocation (e.g. `npm run dev`,
/// `docker compose up`).
pub const SERVER_SUBCOMMANDS: &[&str] = &["dev", "start", "serve", "up", "watch"];
