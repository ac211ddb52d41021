//! Job registry
//!
//! Tracks every submitted job by id through
//! `pending -> running -> {completed, failed}`. The registry is shared by
//! all job tasks and pollers; each job entry is written only by the task
//! that runs it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;


/// Number of log lines kept per job.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::JobNotFound(s.to_string()))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed { output: String },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed { .. })
                | (JobStatus::Running, JobStatus::Completed { .. })
                | (JobStatus::Running, JobStatus::Failed { .. })
        )
    }
}

/// What a poller sees for a job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobPoll {
    NotFound,
    Running,
    Completed { output: String },
    Failed { error: String },
}

impl JobPoll {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPoll::Completed { .. } | JobPoll::Failed { .. })
    }
}

impl From<&JobStatus> for JobPoll {
    fn from(status: &JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Running => JobPoll::Running,
            JobStatus::Completed { output } => JobPoll::Completed {
                output: output.clone(),
            },
            JobStatus::Failed { error } => JobPoll::Failed {
                error: error.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Point-in-time copy of a job entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub original_name: String,
    #[serde(flatten)]
    pub status: JobStatus,
    pub rows_processed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct JobEntry {
    original_name: String,
    status: JobStatus,
    rows_processed: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    logs: VecDeque<LogLine>,
}

impl JobEntry {
    fn snapshot(&self, id: JobId) -> JobSnapshot {
        JobSnapshot {
            id,
            original_name: self.original_name.clone(),
            status: self.status.clone(),
            rows_processed: self.rows_processed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Shared, cloneable handle to the job registry.
#[derive(Debug, Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    log_capacity: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            log_capacity: log_capacity.max(1),
        }
    }

    /// Register a new job in the pending state.
    pub async fn register(&self, id: JobId, original_name: impl Into<String>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(Error::JobAlreadyExists(id.to_string()));
        }

        let now = Utc::now();
        jobs.insert(
            id,
            JobEntry {
                original_name: original_name.into(),
                status: JobStatus::Pending,
                rows_processed: 0,
                created_at: now,
                updated_at: now,
                logs: VecDeque::new(),
            },
        );
        debug!("Registered job {}", id);
        Ok(())
    }

    pub async fn mark_running(&self, id: JobId) -> Result<()> {
        self.transition(id, JobStatus::Running).await
    }

    pub async fn complete(&self, id: JobId, output: impl Into<String>) -> Result<()> {
        self.transition(
            id,
            JobStatus::Completed {
                output: output.into(),
            },
        )
        .await
    }

    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<()> {
        self.transition(
            id,
            JobStatus::Failed {
                error: error.into(),
            },
        )
        .await
    }

    /// Publish the running count of rows submitted for enrichment.
    pub async fn record_progress(&self, id: JobId, rows_processed: usize) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        entry.rows_processed = rows_processed;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Append a line to the job's log buffer, evicting the oldest line when full.
    pub async fn append_log(&self, id: JobId, message: impl Into<String>) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&id) {
            if entry.logs.len() == self.log_capacity {
                entry.logs.pop_front();
            }
            entry.logs.push_back(LogLine {
                timestamp: Utc::now(),
                message: message.into(),
            });
        }
    }

    pub async fn logs(&self, id: JobId) -> Option<Vec<LogLine>> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|entry| entry.logs.iter().cloned().collect())
    }

    pub async fn poll(&self, id: JobId) -> JobPoll {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .map(|entry| JobPoll::from(&entry.status))
            .unwrap_or(JobPoll::NotFound)
    }

    pub async fn get(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|entry| entry.snapshot(id))
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<_> = jobs.iter().map(|(id, e)| e.snapshot(*id)).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    async fn transition(&self, id: JobId, next: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        if !entry.status.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                job_id: id.to_string(),
                from: entry.status.name().to_string(),
                to: next.name().to_string(),
            });
        }

        info!("Job {} {} -> {}", id, entry.status.name(), next.name());
        entry.status = next;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
