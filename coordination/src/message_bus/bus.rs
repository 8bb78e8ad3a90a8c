//! Durable, pull-based, per-agent message bus.
//!
//! Workers never bind network ports; they poll their inbox. The `file`
//! backend below is the reference implementation described in the design
//! notes — `sqlite`/`redis` backends would implement the same [`MessageBus`]
//! trait and are not stubbed out here since nothing in this workspace
//! depends on them yet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::types::{AgentMessage, BusBackendKind};

/// How often the file backend re-lists an inbox while waiting for `poll`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize message: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;

/// Capability shared by every message bus backend.
#[async_trait]
pub trait MessageBus: Send + Sync {
    fn backend_kind(&self) -> BusBackendKind;

    /// Record a message in the recipient's inbox (and the history index,
    /// if the payload carries a `runId`). Implicitly registers both the
    /// sender and the recipient as known agents.
    async fn send(&self, message: AgentMessage) -> BusResult<()>;

    /// Wait up to `timeout` for messages to arrive in `agent_id`'s inbox.
    /// Returns them in ascending timestamp order and removes them from the
    /// inbox (exactly-once consumption). May return before the timeout
    /// elapses; returns `[]` if none arrive in time.
    async fn poll(&self, agent_id: &str, timeout: Duration) -> BusResult<Vec<AgentMessage>>;

    /// Fan a message out to every registered agent except the sender and
    /// any id in `except`.
    async fn broadcast(&self, message: AgentMessage, except: &[String]) -> BusResult<()>;

    /// All messages recorded for a given run, in send order.
    async fn get_message_history(&self, run_id: &str) -> BusResult<Vec<AgentMessage>>;

    async fn initialize(&self) -> BusResult<()>;

    /// Delete history entries (and, opportunistically, now-empty inbox
    /// directories) older than `retention_days`.
    async fn cleanup(&self, retention_days: u32) -> BusResult<()>;
}

/// File-backed message bus: one directory per agent inbox, one append-only
/// JSON-lines file per run's history.
pub struct FileMessageBus {
    root: PathBuf,
    known_agents: Mutex<HashMap<String, ()>>,
    notify: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FileMessageBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            known_agents: Mutex::new(HashMap::new()),
            notify: Mutex::new(HashMap::new()),
        }
    }

    fn queue_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join("queues").join(sanitize_agent_id(agent_id))
    }

    fn history_path(&self, run_id: &str) -> PathBuf {
        self.root.join("history").join(format!("{run_id}.jsonl"))
    }

    async fn register(&self, agent_id: &str) {
        let mut known = self.known_agents.lock().await;
        known.entry(agent_id.to_string()).or_insert(());
    }

    async fn notify_handle(&self, agent_id: &str) -> Arc<Notify> {
        let mut map = self.notify.lock().await;
        map.entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    async fn write_message(&self, message: &AgentMessage) -> BusResult<()> {
        let dir = self.queue_dir(&message.to);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| BusError::Io { path: dir.clone(), source })?;

        let filename = format!(
            "{:020}-{}.json",
            message.timestamp.timestamp_nanos_opt().unwrap_or(0),
            message.id
        );
        let path = dir.join(filename);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(message)?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|source| BusError::Io { path: tmp_path.clone(), source })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| BusError::Io { path, source })?;

        if let Some(run_id) = message.run_id() {
            let history_path = self.history_path(run_id);
            if let Some(parent) = history_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| BusError::Io { path: parent.to_path_buf(), source })?;
            }
            let mut line = serde_json::to_string(message)?;
            line.push('\n');
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&history_path)
                .await
                .map_err(|source| BusError::Io { path: history_path.clone(), source })?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|source| BusError::Io { path: history_path, source })?;
        }

        Ok(())
    }

    async fn list_inbox(&self, agent_id: &str) -> BusResult<Vec<(PathBuf, AgentMessage)>> {
        let dir = self.queue_dir(agent_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(BusError::Io { path: dir, source }),
        };

        let mut messages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| BusError::Io { path: dir.clone(), source })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| BusError::Io { path: path.clone(), source })?;
            match serde_json::from_slice::<AgentMessage>(&bytes) {
                Ok(msg) => messages.push((path, msg)),
                Err(e) => warn!(?path, error = %e, "dropping unreadable inbox entry"),
            }
        }

        messages.sort_by_key(|(_, m)| m.timestamp);
        Ok(messages)
    }
}

#[async_trait]
impl MessageBus for FileMessageBus {
    fn backend_kind(&self) -> BusBackendKind {
        BusBackendKind::File
    }

    async fn send(&self, message: AgentMessage) -> BusResult<()> {
        self.register(&message.from).await;
        self.register(&message.to).await;
        self.write_message(&message).await?;
        self.notify_handle(&message.to).await.notify_waiters();
        debug!(to = %message.to, msg_type = message.message_type(), "message sent");
        Ok(())
    }

    async fn poll(&self, agent_id: &str, timeout: Duration) -> BusResult<Vec<AgentMessage>> {
        self.register(agent_id).await;
        let notify = self.notify_handle(agent_id).await;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let entries = self.list_inbox(agent_id).await?;
            if !entries.is_empty() {
                let mut out = Vec::with_capacity(entries.len());
                for (path, msg) in entries {
                    if let Err(source) = tokio::fs::remove_file(&path).await {
                        if source.kind() != std::io::ErrorKind::NotFound {
                            return Err(BusError::Io { path, source });
                        }
                    }
                    out.push(msg);
                }
                return Ok(out);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline - now;
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(remaining.min(POLL_INTERVAL)) => {}
            }
        }
    }

    async fn broadcast(&self, message: AgentMessage, except: &[String]) -> BusResult<()> {
        let sender = message.from.clone();
        let recipients: Vec<String> = {
            let known = self.known_agents.lock().await;
            known
                .keys()
                .filter(|id| **id != sender && !except.contains(id))
                .cloned()
                .collect()
        };

        for recipient in recipients {
            let mut copy = message.clone();
            copy.id = uuid::Uuid::new_v4().to_string();
            copy.to = recipient;
            if let Err(e) = self.write_message(&copy).await {
                warn!(to = %copy.to, error = %e, "broadcast delivery to one inbox failed");
                continue;
            }
            self.notify_handle(&copy.to).await.notify_waiters();
        }

        Ok(())
    }

    async fn get_message_history(&self, run_id: &str) -> BusResult<Vec<AgentMessage>> {
        let path = self.history_path(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(BusError::Io { path, source }),
        };

        let mut out = Vec::new();
        for line in String::from_utf8_lossy(&bytes).lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }

    async fn initialize(&self) -> BusResult<()> {
        for sub in ["queues", "history"] {
            let dir = self.root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| BusError::Io { path: dir, source })?;
        }
        Ok(())
    }

    async fn cleanup(&self, retention_days: u32) -> BusResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let history_dir = self.root.join("history");
        let mut entries = match tokio::fs::read_dir(&history_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(BusError::Io { path: history_dir, source }),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| BusError::Io { path: history_dir.clone(), source })?
        {
            let path = entry.path();
            let keep = keep_entry(&path, cutoff).await;
            if !keep {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }

        Ok(())
    }
}

async fn keep_entry(path: &Path, cutoff: DateTime<Utc>) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    let modified: DateTime<Utc> = modified.into();
    modified >= cutoff
}

/// Collapse an agent id to a filesystem-safe directory name; mirrors the
/// identifier-sanitizing approach already used for shell argument safety.
fn sanitize_agent_id(agent_id: &str) -> String {
    agent_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_bus::types::MessagePayload;

    fn assign(run_id: &str, ticket_id: &str) -> MessagePayload {
        MessagePayload::TaskAssign {
            run_id: run_id.into(),
            ticket_id: ticket_id.into(),
            instructions: "go".into(),
        }
    }

    #[tokio::test]
    async fn send_then_poll_is_ordered_and_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let bus = FileMessageBus::new(dir.path());
        bus.initialize().await.unwrap();

        let m1 = AgentMessage::new("planner", "dev-1", assign("run-1", "T-1"));
        tokio::time::sleep(Duration::from_millis(2)).await;
        let m2 = AgentMessage::new("planner", "dev-1", assign("run-1", "T-2"));

        bus.send(m1.clone()).await.unwrap();
        bus.send(m2.clone()).await.unwrap();

        let received = bus.poll("dev-1", Duration::from_millis(200)).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].id, m1.id);
        assert_eq!(received[1].id, m2.id);

        let second = bus.poll("dev-1", Duration::from_millis(50)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn poll_times_out_with_empty_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let bus = FileMessageBus::new(dir.path());
        bus.initialize().await.unwrap();

        let result = bus.poll("nobody", Duration::from_millis(60)).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_agent_except_sender() {
        let dir = tempfile::tempdir().unwrap();
        let bus = FileMessageBus::new(dir.path());
        bus.initialize().await.unwrap();

        bus.register("dev-1").await;
        bus.register("dev-2").await;
        bus.register("reviewer-1").await;

        let msg = AgentMessage::new(
            "quality_authority",
            "*",
            MessagePayload::Broadcast {
                run_id: None,
                body: "pause".into(),
            },
        );
        bus.broadcast(msg, &["dev-2".to_string()]).await.unwrap();

        let dev1 = bus.poll("dev-1", Duration::from_millis(50)).await.unwrap();
        let dev2 = bus.poll("dev-2", Duration::from_millis(50)).await.unwrap();
        let reviewer = bus
            .poll("reviewer-1", Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(dev1.len(), 1);
        assert!(dev2.is_empty());
        assert_eq!(reviewer.len(), 1);
    }

    #[tokio::test]
    async fn history_survives_inbox_consumption() {
        let dir = tempfile::tempdir().unwrap();
        let bus = FileMessageBus::new(dir.path());
        bus.initialize().await.unwrap();

        let m = AgentMessage::new("planner", "dev-1", assign("run-7", "T-1"));
        bus.send(m.clone()).await.unwrap();
        let _ = bus.poll("dev-1", Duration::from_millis(50)).await.unwrap();

        let history = bus.get_message_history("run-7").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, m.id);
    }
}
