//! Batch scheduler
//!
//! Runs one job end to end: loads the input table, walks it in fixed-size
//! windows, submits the eligible rows of each window to the enrichment API,
//! merges the results back positionally and records the outcome.
//!
//! Batches of a job are strictly sequential. Every window, including one
//! with no eligible rows and the last one, is followed by the configured
//! delay so the request rate stays predictable.

use crate::client::{ApiKey, EnrichmentApi};
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::jobs::{JobId, JobTracker};
use crate::record::{validate, Record};
use crate::table::EnrichmentTable;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// One window of the input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position of the batch within the job.
    pub number: usize,
    pub rows: Range<usize>,
    /// Eligible records of the window with their row index.
    pub eligible: Vec<(usize, Record)>,
}

/// Partition the table into windows of `batch_size` rows, in row order.
pub fn plan_batches(table: &EnrichmentTable, batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    (0..table.len())
        .step_by(size)
        .enumerate()
        .map(|(i, start)| {
            let end = (start + size).min(table.len());
            let eligible = (start..end)
                .filter_map(|row| validate(&table.raw_row(row)).map(|record| (row, record)))
                .collect();
            Batch {
                number: i + 1,
                rows: start..end,
                eligible,
            }
        })
        .collect()
}

/// Everything the scheduler needs to run one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub original_name: String,
    pub api_key: ApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        output: PathBuf,
        rows_processed: usize,
    },
    Failed {
        error: String,
    },
}

pub struct BatchScheduler {
    client: Arc<dyn EnrichmentApi>,
    tracker: JobTracker,
    history: Arc<HistoryLog>,
    batch: BatchConfig,
}

impl BatchScheduler {
    pub fn new(
        client: Arc<dyn EnrichmentApi>,
        tracker: JobTracker,
        history: Arc<HistoryLog>,
        batch: BatchConfig,
    ) -> Self {
        Self {
            client,
            tracker,
            history,
            batch,
        }
    }

    /// Run a registered job to a terminal state.
    pub async fn run(&self, job: JobSpec, cancel: CancellationToken) -> JobOutcome {
        // Cancelled before it started: pending -> failed
        if cancel.is_cancelled() {
            return self.finish_failed(&job, Error::Cancelled).await;
        }

        if let Err(e) = self.tracker.mark_running(job.id).await {
            error!("Cannot start job {}: {}", job.id, e);
            if let Err(fail_err) = self.tracker.fail(job.id, e.to_string()).await {
                debug!("Job {} left unchanged: {}", job.id, fail_err);
            }
            return JobOutcome::Failed {
                error: e.to_string(),
            };
        }

        let result = match self.process(&job, &cancel).await {
            Ok(rows_processed) => self.record_completed(&job, rows_processed).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(rows_processed) => self.finish_completed(&job, rows_processed).await,
            Err(e) => self.finish_failed(&job, e).await,
        }
    }

    async fn process(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<usize> {
        self.note(job.id, "Starting CSV processing...").await;

        let mut table = EnrichmentTable::load(&job.input_path).await?;
        self.note(job.id, format!("Loaded CSV with {} rows", table.len()))
            .await;

        let batches = plan_batches(&table, self.batch.size);
        self.note(
            job.id,
            format!(
                "Processing {} rows in batches of {}",
                table.len(),
                self.batch.size
            ),
        )
        .await;

        let mut rows_processed = 0;
        for batch in &batches {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.note(
                job.id,
                format!(
                    "Processing batch {}: rows {} to {}",
                    batch.number,
                    batch.rows.start + 1,
                    batch.rows.end
                ),
            )
            .await;

            if batch.eligible.is_empty() {
                self.note(job.id, "Skipping batch - no valid data").await;
                self.pause(cancel).await?;
                continue;
            }

            let records: Vec<Record> = batch.eligible.iter().map(|(_, r)| r.clone()).collect();
            self.note(
                job.id,
                format!("Sending batch with {} valid records", records.len()),
            )
            .await;

            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = self.client.enrich(&records, &job.api_key) => results?,
            };

            if results.len() != records.len() {
                warn!(
                    "Batch {} of job {}: {} results for {} records",
                    batch.number,
                    job.id,
                    results.len(),
                    records.len()
                );
            }

            let mut failed = 0;
            for ((row, _), result) in batch.eligible.iter().zip(&results) {
                if result.is_error() {
                    failed += 1;
                }
                table.set_enrichment(*row, result.to_string());
            }

            rows_processed += records.len();
            self.tracker.record_progress(job.id, rows_processed).await?;

            if failed > 0 {
                self.note(
                    job.id,
                    format!("Batch {} finished with {} errored rows", batch.number, failed),
                )
                .await;
            }
            self.note(
                job.id,
                format!(
                    "Batch completed. Waiting {:?} before next batch...",
                    self.batch.delay
                ),
            )
            .await;
            self.pause(cancel).await?;
        }

        table.write(&job.output_path).await?;
        self.note(
            job.id,
            format!(
                "Processing complete! Output saved to {}",
                job.output_path.display()
            ),
        )
        .await;

        Ok(rows_processed)
    }

    /// Append the completed history entry. On failure the written output is
    /// removed so the job leaves no artifact behind.
    async fn record_completed(&self, job: &JobSpec, rows_processed: usize) -> Result<usize> {
        let output_name = file_name(&job.output_path);
        let entry = HistoryEntry::completed(job.id, &job.original_name, &output_name, rows_processed);

        if let Err(e) = self.history.append(&entry).await {
            if let Err(rm) = tokio::fs::remove_file(&job.output_path).await {
                warn!("Failed to remove output {}: {}", job.output_path.display(), rm);
            }
            return Err(e);
        }
        Ok(rows_processed)
    }

    async fn finish_completed(&self, job: &JobSpec, rows_processed: usize) -> JobOutcome {
        let output_name = file_name(&job.output_path);

        if let Err(e) = self.tracker.complete(job.id, &output_name).await {
            error!("Failed to mark job {} completed: {}", job.id, e);
        }

        info!(
            "Job {} completed: {} rows submitted for enrichment",
            job.id, rows_processed
        );
        JobOutcome::Completed {
            output: job.output_path.clone(),
            rows_processed,
        }
    }

    async fn finish_failed(&self, job: &JobSpec, err: Error) -> JobOutcome {
        let message = err.to_string();
        error!("Job {} failed: {}", job.id, message);
        self.tracker
            .append_log(job.id, format!("FATAL ERROR: {}", message))
            .await;

        let entry = HistoryEntry::failed(job.id, &job.original_name);
        if let Err(e) = self.history.append(&entry).await {
            error!("Failed to record history for job {}: {}", job.id, e);
        }

        if let Err(e) = self.tracker.fail(job.id, &message).await {
            error!("Failed to mark job {} failed: {}", job.id, e);
        }

        JobOutcome::Failed { error: message }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.batch.delay) => Ok(()),
        }
    }

    async fn note(&self, id: JobId, message: impl Into<String>) {
        let message = message.into();
        debug!(job_id = %id, "{}", message);
        self.tracker.append_log(id, message).await;
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
