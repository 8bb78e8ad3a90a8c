//! Tool Call Surface — the fixed set of tools a worker's chat loop can
//! call against its workspace: `read_file`, `write_file`, `edit_file`,
//! `list_directory`, `run_command`, `git_commit`, `git_status`. Wraps
//! [`swarm_core::ProcessSupervisor`] and [`swarm_core::GitCoordinator`];
//! file operations are implemented directly here rather than through
//! `tools::fs_tools`/`tools::patch_tool` because those speak the
//! `rig::tool::Tool` calling convention for a single chat agent, while this
//! surface implements the line-indexed edit contract and sandboxing rules
//! a non-rig worker loop needs verbatim.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use swarm_core::{ExecOptions, GitCoordinator, ProcessSupervisor};
use thiserror::Error;

const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Access denied")]
    AccessDenied,
    #[error("Cannot read directory as file")]
    IsDirectory,
    #[error("file exceeds maximum read size of {MAX_READ_BYTES} bytes")]
    TooLarge,
    #[error("Invalid start line")]
    InvalidStartLine,
    #[error("End line must be >= start line")]
    EndBeforeStart,
    #[error("exceeds file length")]
    ExceedsFileLength,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Git(#[from] swarm_core::GitCoordinatorError),
    #[error(transparent)]
    Supervisor(#[from] swarm_core::SupervisorError),
}

pub type ToolCallResult<T> = Result<T, ToolCallError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Edit {
    Replace { start_line: u32, end_line: u32, content: String },
    Insert { start_line: u32, content: String },
    Delete { start_line: u32, end_line: u32 },
}

impl Edit {
    fn start_line(&self) -> u32 {
        match self {
            Edit::Replace { start_line, .. } => *start_line,
            Edit::Insert { start_line, .. } => *start_line,
            Edit::Delete { start_line, .. } => *start_line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub modified_at: DateTime<Utc>,
}

/// The fixed tool surface a worker's workspace exposes to its chat loop.
pub struct ToolSurface {
    workspace: PathBuf,
    supervisor: ProcessSupervisor,
    git: GitCoordinator,
}

/// A single tool invocation as the chat loop emits it, tagged by tool name
/// so it can be deserialized straight off the model's tool-call JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    EditFile { path: String, edits: Vec<Edit> },
    ListDirectory { path: String },
    RunCommand { cmd: Vec<String>, timeout_seconds: Option<u64> },
    GitCommit { message: String, files: Option<Vec<String>> },
    GitStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolCallOutput {
    Text(String),
    Entries(Vec<DirEntry>),
    Command(swarm_core::CommandResult),
}

impl ToolSurface {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            git: GitCoordinator::new(&workspace),
            supervisor: ProcessSupervisor::new(),
            workspace,
        }
    }

    fn resolve(&self, path: &str) -> ToolCallResult<PathBuf> {
        let candidate = self.workspace.join(path);
        let root = self.workspace.canonicalize().map_err(|_| ToolCallError::AccessDenied)?;

        let resolved = match candidate.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                let parent = candidate.parent().ok_or(ToolCallError::AccessDenied)?;
                let canon_parent = parent.canonicalize().map_err(|_| ToolCallError::AccessDenied)?;
                canon_parent.join(candidate.file_name().ok_or(ToolCallError::AccessDenied)?)
            }
        };

        if !resolved.starts_with(&root) {
            return Err(ToolCallError::AccessDenied);
        }
        Ok(resolved)
    }

    pub fn read_file(&self, path: &str) -> ToolCallResult<String> {
        let resolved = self.resolve(path)?;
        let meta = std::fs::metadata(&resolved)?;
        if meta.is_dir() {
            return Err(ToolCallError::IsDirectory);
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(ToolCallError::TooLarge);
        }
        Ok(std::fs::read_to_string(resolved)?)
    }

    pub fn write_file(&self, path: &str, content: &str) -> ToolCallResult<()> {
        let candidate = self.workspace.join(path);
        if let Some(parent) = candidate.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let resolved = self.resolve(path)?;
        std::fs::write(resolved, content)?;
        Ok(())
    }

    /// Applies `edits` to the file at `path` in descending `start_line`
    /// order so earlier edits never shift the line numbers later edits
    /// reference. Replace/delete spans are `[start_line, end_line]`
    /// inclusive and 1-indexed; insert places `content` before
    /// `start_line`.
    pub fn edit_file(&self, path: &str, mut edits: Vec<Edit>) -> ToolCallResult<()> {
        if edits.is_empty() {
            return Ok(());
        }
        edits.sort_by(|a, b| b.start_line().cmp(&a.start_line()));

        let resolved = self.resolve(path)?;
        let original = std::fs::read_to_string(&resolved)?;
        let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

        for edit in edits {
            apply_edit(&mut lines, &edit)?;
        }

        let mut content = lines.join("\n");
        if original.ends_with('\n') || original.is_empty() {
            content.push('\n');
        }
        std::fs::write(resolved, content)?;
        Ok(())
    }

    pub fn list_directory(&self, path: &str) -> ToolCallResult<Vec<DirEntry>> {
        let resolved = if path.is_empty() { self.workspace.clone() } else { self.resolve(path)? };
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&resolved)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            let entry_type = if metadata.is_dir() {
                EntryType::Directory
            } else if metadata.file_type().is_symlink() {
                EntryType::Symlink
            } else if metadata.is_file() {
                EntryType::File
            } else {
                EntryType::Other
            };
            let modified_at: DateTime<Utc> = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                entry_type,
                size: metadata.is_file().then_some(metadata.len()),
                modified_at,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn run_command(&self, cmd: &[String], timeout_seconds: Option<u64>) -> ToolCallResult<swarm_core::CommandResult> {
        let opts = ExecOptions {
            cwd: Some(self.workspace.clone()),
            timeout_seconds,
            ..Default::default()
        };
        Ok(self.supervisor.execute(cmd, opts).await?)
    }

    pub fn git_commit(&self, message: &str, files: Option<&[&str]>) -> ToolCallResult<String> {
        self.git.stage(files.unwrap_or(&["."]))?;
        Ok(self.git.commit(message)?)
    }

    pub fn git_status(&self) -> ToolCallResult<String> {
        Ok(self.git.get_status()?)
    }

    /// Dispatches a single tagged [`ToolCall`] to the matching operation.
    pub async fn dispatch(&self, call: ToolCall) -> ToolCallResult<ToolCallOutput> {
        match call {
            ToolCall::ReadFile { path } => self.read_file(&path).map(ToolCallOutput::Text),
            ToolCall::WriteFile { path, content } => {
                self.write_file(&path, &content)?;
                Ok(ToolCallOutput::Text(format!("wrote {} bytes to {path}", content.len())))
            }
            ToolCall::EditFile { path, edits } => {
                self.edit_file(&path, edits)?;
                Ok(ToolCallOutput::Text(format!("edited {path}")))
            }
            ToolCall::ListDirectory { path } => self.list_directory(&path).map(ToolCallOutput::Entries),
            ToolCall::RunCommand { cmd, timeout_seconds } => {
                self.run_command(&cmd, timeout_seconds).await.map(ToolCallOutput::Command)
            }
            ToolCall::GitCommit { message, files } => {
                let file_refs: Option<Vec<&str>> = files.as_ref().map(|f| f.iter().map(String::as_str).collect());
                self.git_commit(&message, file_refs.as_deref()).map(ToolCallOutput::Text)
            }
            ToolCall::GitStatus => self.git_status().map(ToolCallOutput::Text),
        }
    }
}

fn apply_edit(lines: &mut Vec<String>, edit: &Edit) -> ToolCallResult<()> {
    let start = edit.start_line();
    if start == 0 {
        return Err(ToolCallError::InvalidStartLine);
    }

    match edit {
        Edit::Replace { start_line, end_line, content } => {
            if end_line < start_line {
                return Err(ToolCallError::EndBeforeStart);
            }
            if *end_line as usize > lines.len() {
                return Err(ToolCallError::ExceedsFileLength);
            }
            let start_idx = (*start_line - 1) as usize;
            let end_idx = *end_line as usize;
            let replacement: Vec<String> = content.lines().map(str::to_string).collect();
            lines.splice(start_idx..end_idx, replacement);
        }
        Edit::Insert { start_line, content } => {
            if *start_line as usize > lines.len() + 1 {
                return Err(ToolCallError::ExceedsFileLength);
            }
            let idx = (*start_line - 1) as usize;
            let insertion: Vec<String> = content.lines().map(str::to_string).collect();
            lines.splice(idx..idx, insertion);
        }
        Edit::Delete { start_line, end_line } => {
            if end_line < start_line {
                return Err(ToolCallError::EndBeforeStart);
            }
            if *end_line as usize > lines.len() {
                return Err(ToolCallError::ExceedsFileLength);
            }
            let start_idx = (*start_line - 1) as usize;
            let end_idx = *end_line as usize;
            lines.splice(start_idx..end_idx, std::iter::empty());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, ToolSurface) {
        let dir = TempDir::new().unwrap();
        std::process::Command::new("git").arg("init").arg("-q").current_dir(dir.path()).output().unwrap();
        let surface = ToolSurface::new(dir.path());
        (dir, surface)
    }

    #[test]
    fn read_file_rejects_path_outside_workspace() {
        let (_dir, surface) = workspace();
        let result = surface.read_file("../../etc/passwd");
        assert!(matches!(result, Err(ToolCallError::AccessDenied)));
    }

    #[test]
    fn read_file_rejects_directory() {
        let (dir, surface) = workspace();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let result = surface.read_file("subdir");
        assert!(matches!(result, Err(ToolCallError::IsDirectory)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, surface) = workspace();
        surface.write_file("a/b.txt", "hello\nworld").unwrap();
        assert_eq!(surface.read_file("a/b.txt").unwrap(), "hello\nworld");
    }

    #[test]
    fn edit_file_replace_applies_in_descending_order() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        surface
            .edit_file(
                "f.txt",
                vec![
                    Edit::Replace { start_line: 1, end_line: 1, content: "ONE".to_string() },
                    Edit::Delete { start_line: 3, end_line: 3 },
                ],
            )
            .unwrap();
        assert_eq!(surface.read_file("f.txt").unwrap(), "ONE\ntwo\n");
    }

    #[test]
    fn edit_file_insert_before_start_line() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("f.txt"), "a\nb\n").unwrap();
        surface.edit_file("f.txt", vec![Edit::Insert { start_line: 2, content: "x".to_string() }]).unwrap();
        assert_eq!(surface.read_file("f.txt").unwrap(), "a\nx\nb\n");
    }

    #[test]
    fn edit_file_empty_edits_leaves_content_unchanged() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("f.txt"), "unchanged\n").unwrap();
        surface.edit_file("f.txt", vec![]).unwrap();
        assert_eq!(surface.read_file("f.txt").unwrap(), "unchanged\n");
    }

    #[test]
    fn edit_file_end_before_start_is_rejected() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("f.txt"), "a\nb\n").unwrap();
        let result = surface.edit_file("f.txt", vec![Edit::Replace { start_line: 2, end_line: 1, content: "x".to_string() }]);
        assert!(matches!(result, Err(ToolCallError::EndBeforeStart)));
    }

    #[test]
    fn edit_file_out_of_range_is_rejected() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("f.txt"), "a\nb\n").unwrap();
        let result = surface.edit_file("f.txt", vec![Edit::Replace { start_line: 1, end_line: 10, content: "x".to_string() }]);
        assert!(matches!(result, Err(ToolCallError::ExceedsFileLength)));
    }

    #[tokio::test]
    async fn dispatch_round_trips_write_then_read() {
        let (_dir, surface) = workspace();
        surface.dispatch(ToolCall::WriteFile { path: "f.txt".into(), content: "hi".into() }).await.unwrap();
        let out = surface.dispatch(ToolCall::ReadFile { path: "f.txt".into() }).await.unwrap();
        assert!(matches!(out, ToolCallOutput::Text(s) if s == "hi"));
    }

    #[test]
    fn list_directory_is_sorted() {
        let (dir, surface) = workspace();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let entries = surface.list_directory("").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
