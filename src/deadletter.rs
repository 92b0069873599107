//! Durable queue for balance adjustments that exhausted their write retries
//!
//! Append-only JSON lines. A `queued` record is outstanding until a `resolved`
//! record with the same id follows it. Nothing is ever rewritten in place, so
//! the file doubles as an audit trail for operators.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::store::AccountId;

/// A balance change that still has to reach the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAdjustment {
    pub id: Uuid,
    pub account: AccountId,
    pub delta: i64,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Record {
    Queued(QueuedAdjustment),
    Resolved { id: Uuid, resolved_at: DateTime<Utc> },
}

pub struct DeadLetterLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeadLetterLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("creating dead-letter directory {}", parent.display())
                })?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist an adjustment the ledger could not apply
    pub async fn enqueue(
        &self,
        account: AccountId,
        delta: i64,
        reason: &str,
    ) -> Result<QueuedAdjustment> {
        let adjustment = QueuedAdjustment {
            id: Uuid::new_v4(),
            account,
            delta,
            reason: reason.to_string(),
            queued_at: Utc::now(),
        };
        self.append(&Record::Queued(adjustment.clone())).await?;
        error!(
            %account,
            delta,
            id = %adjustment.id,
            reason,
            "balance adjustment dead-lettered"
        );
        Ok(adjustment)
    }

    /// Record that a queued adjustment has been applied
    pub async fn resolve(&self, id: Uuid) -> Result<()> {
        self.append(&Record::Resolved {
            id,
            resolved_at: Utc::now(),
        })
        .await
    }

    /// Queued adjustments without a matching resolution, oldest first
    pub async fn outstanding(&self) -> Result<Vec<QueuedAdjustment>> {
        let _guard = self.lock.lock().await;

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading dead letters {}", self.path.display()))
            }
        };

        let mut queued = vec![];
        let mut resolved = HashSet::new();
        for (line_number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(Record::Queued(adjustment)) => queued.push(adjustment),
                Ok(Record::Resolved { id, .. }) => {
                    resolved.insert(id);
                }
                Err(e) => warn!(line = line_number + 1, "skipping unreadable dead letter: {}", e),
            }
        }

        queued.retain(|a| !resolved.contains(&a.id));
        Ok(queued)
    }

    async fn append(&self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening dead letters {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_has_nothing_outstanding() {
        let dir = TempDir::new().unwrap();
        let log = DeadLetterLog::open(&dir.path().join("nested/dead.jsonl")).unwrap();
        assert!(log.outstanding().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolved_entries_drop_out() {
        let dir = TempDir::new().unwrap();
        let log = DeadLetterLog::open(&dir.path().join("dead.jsonl")).unwrap();

        let first = log.enqueue(AccountId(1), -1, "query debit").await.unwrap();
        let second = log.enqueue(AccountId(2), 10, "manual").await.unwrap();
        log.resolve(first.id).await.unwrap();

        let outstanding = log.outstanding().await.unwrap();
        assert_eq!(outstanding, vec![second]);
    }

    #[tokio::test]
    async fn test_survives_reopen_and_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dead.jsonl");

        let queued = {
            let log = DeadLetterLog::open(&path).unwrap();
            log.enqueue(AccountId(3), -1, "query debit").await.unwrap()
        };
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("not json\n\n");
        std::fs::write(&path, raw).unwrap();

        let log = DeadLetterLog::open(&path).unwrap();
        let outstanding = log.outstanding().await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].id, queued.id);
        assert_eq!(outstanding[0].delta, -1);
    }
}
