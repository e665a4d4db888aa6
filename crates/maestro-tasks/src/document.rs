//! Task documents: persisted, human-readable mirrors of task state.
//!
//! The in-memory [`Task`](crate::task::Task) is authoritative; documents
//! are advisory audit records. A document lives under `running/` while
//! its task is live and moves to `completed/` when the task reaches a
//! terminal status. Writes go through a temp file and an atomic rename,
//! and the owning execution future is the only writer for a task id, so
//! readers never observe a torn document.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use maestro_core::{MaestroResult, UserId};
use uuid::Uuid;

use crate::task::Task;

/// Where a finalized document lands, and with what outcome line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for DocumentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentOutcome::Completed => write!(f, "completed"),
            DocumentOutcome::Failed => write!(f, "failed"),
            DocumentOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Persistence seam for task documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes (or rewrites) the running document for a task.
    async fn write(&self, user: &UserId, task_id: Uuid, content: &str) -> MaestroResult<()>;

    /// Appends the outcome and moves the document from `running/` to
    /// `completed/`.
    async fn finalize(
        &self,
        user: &UserId,
        task_id: Uuid,
        outcome: DocumentOutcome,
        body: Option<&str>,
    ) -> MaestroResult<()>;

    /// Removes completed documents older than `max_age`. Returns how
    /// many were removed.
    async fn purge_completed(&self, max_age: Duration) -> MaestroResult<usize>;
}

/// Renders the initial document for a freshly admitted task.
pub fn initial_document(task: &Task) -> String {
    format!(
        "# Task {}\n\n- status: {}\n- user: {}\n- parent message: {}\n- created: {}\n\n\
         ## Description\n\n{}\n\n## Prompt\n\n{}\n",
        task.task_id,
        task.status,
        task.user_id,
        task.parent_message_id,
        task.created_at.to_rfc3339(),
        task.description,
        task.original_prompt,
    )
}

/// File-backed document store (markdown files on disk).
pub struct FileDocumentStore {
    running: PathBuf,
    completed: PathBuf,
}

impl FileDocumentStore {
    /// Creates the store under `root`, with `running/` and `completed/`
    /// subdirectories.
    pub async fn new(root: PathBuf) -> MaestroResult<Self> {
        let running = root.join("running");
        let completed = root.join("completed");
        tokio::fs::create_dir_all(&running).await?;
        tokio::fs::create_dir_all(&completed).await?;
        Ok(Self { running, completed })
    }

    fn doc_name(user: &UserId, task_id: Uuid) -> String {
        format!("{user}-{task_id}.md")
    }

    async fn write_atomic(path: &Path, content: &str) -> MaestroResult<()> {
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn write(&self, user: &UserId, task_id: Uuid, content: &str) -> MaestroResult<()> {
        let path = self.running.join(Self::doc_name(user, task_id));
        Self::write_atomic(&path, content).await
    }

    async fn finalize(
        &self,
        user: &UserId,
        task_id: Uuid,
        outcome: DocumentOutcome,
        body: Option<&str>,
    ) -> MaestroResult<()> {
        let name = Self::doc_name(user, task_id);
        let running = self.running.join(&name);
        let mut content = match tokio::fs::read_to_string(&running).await {
            Ok(text) => text,
            Err(_) => format!("# Task {task_id}\n"),
        };
        content.push_str(&format!(
            "\n## Outcome\n\n- status: {}\n- finalized: {}\n",
            outcome,
            Utc::now().to_rfc3339()
        ));
        if let Some(body) = body {
            content.push_str(&format!("\n{body}\n"));
        }
        Self::write_atomic(&self.completed.join(&name), &content).await?;
        if running.exists() {
            tokio::fs::remove_file(&running).await?;
        }
        Ok(())
    }

    async fn purge_completed(&self, max_age: Duration) -> MaestroResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.completed).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            if meta.is_file() && modified < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Discards every document. For embedders that do not persist task
/// records.
pub struct NullDocumentStore;

#[async_trait]
impl DocumentStore for NullDocumentStore {
    async fn write(&self, _user: &UserId, _task_id: Uuid, _content: &str) -> MaestroResult<()> {
        Ok(())
    }

    async fn finalize(
        &self,
        _user: &UserId,
        _task_id: Uuid,
        _outcome: DocumentOutcome,
        _body: Option<&str>,
    ) -> MaestroResult<()> {
        Ok(())
    }

    async fn purge_completed(&self, _max_age: Duration) -> MaestroResult<usize> {
        Ok(0)
    }
}
