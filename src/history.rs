//! Append-only job history
//!
//! Each finished job appends one JSON line to the history file. Appends are
//! serialized through a mutex so concurrent job completions never interleave
//! or lose lines.

use crate::error::Result;
use crate::jobs::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub job_id: JobId,
    pub original_filename: String,
    /// Empty when the job failed.
    pub output_filename: String,
    pub status: HistoryStatus,
    pub rows_processed: usize,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn completed(
        job_id: JobId,
        original_filename: impl Into<String>,
        output_filename: impl Into<String>,
        rows_processed: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            original_filename: original_filename.into(),
            output_filename: output_filename.into(),
            status: HistoryStatus::Completed,
            rows_processed,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: JobId, original_filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            original_filename: original_filename.into(),
            output_filename: String::new(),
            status: HistoryStatus::Failed,
            rows_processed: 0,
            timestamp: Utc::now(),
        }
    }
}

/// JSONL-backed history store.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Durably append one entry.
    pub async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        debug!(
            "Appended {:?} history entry for job {}",
            entry.status, entry.job_id
        );
        Ok(())
    }

    /// Every recorded entry, most recent first.
    pub async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping malformed history line {}: {}", n + 1, e);
                    None
                }
            })
            .collect();

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}
