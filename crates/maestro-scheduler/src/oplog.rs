//! Append-only operation log.
//!
//! Every mutating scheduler operation and every fire decision is
//! recorded as one JSONL line. Delete entries embed a full snapshot of
//! the removed job, prompt included, so destructive operations stay
//! recoverable by inspection.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use maestro_core::UserId;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::job::ScheduledJob;

/// One logged operation.
#[derive(Debug, Clone, Serialize)]
pub struct OpEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub action: String,
    pub job_id: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ScheduledJob>,
}

/// Writes [`OpEntry`]s to `operations.jsonl` from a background task, so
/// logging never blocks a scheduler operation.
#[derive(Clone)]
pub struct OperationLog {
    tx: mpsc::UnboundedSender<OpEntry>,
}

impl OperationLog {
    /// Spawns the writer task appending to `log_dir/operations.jsonl`.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OpEntry>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "operation log dir unavailable");
            }
            let log_file = log_dir.join("operations.jsonl");

            while let Some(entry) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&entry) else {
                    continue;
                };
                let write = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await?;
                    file.write_all(format!("{line}\n").as_bytes()).await
                };
                if let Err(e) = write.await {
                    warn!(file = %log_file.display(), error = %e, "operation log write failed");
                }
            }
        });

        Self { tx }
    }

    pub fn log(&self, entry: OpEntry) {
        info!(
            user_id = %entry.user_id,
            action = %entry.action,
            job_id = %entry.job_id,
            "scheduler operation"
        );
        let _ = self.tx.send(entry);
    }

    pub fn record(
        &self,
        user_id: &UserId,
        action: impl Into<String>,
        job_id: &str,
        details: serde_json::Value,
    ) {
        self.log(OpEntry {
            timestamp: Utc::now(),
            user_id: user_id.clone(),
            action: action.into(),
            job_id: job_id.to_string(),
            details,
            snapshot: None,
        });
    }

    /// Like [`record`](Self::record), with the full job embedded.
    pub fn record_with_snapshot(
        &self,
        user_id: &UserId,
        action: impl Into<String>,
        details: serde_json::Value,
        snapshot: ScheduledJob,
    ) {
        self.log(OpEntry {
            timestamp: Utc::now(),
            user_id: user_id.clone(),
            action: action.into(),
            job_id: snapshot.id.clone(),
            details,
            snapshot: Some(snapshot),
        });
    }
}
