//! Job submission and lifecycle
//!
//! [`EnrichmentService`] wires the tracker, history log and scheduler
//! together. Each submitted job runs on its own tokio task; the service keeps
//! the task handle and a cancellation token until the task ends.

use crate::client::{ApiKey, ApolloClient, EnrichmentApi};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::jobs::{JobId, JobPoll, JobSnapshot, JobStatus, JobTracker, LogLine};
use crate::scheduler::{BatchScheduler, JobOutcome, JobSpec};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RunningJob {
    cancel: CancellationToken,
    /// Taken by the first caller of [`EnrichmentService::wait`].
    handle: Option<JoinHandle<JobOutcome>>,
}

pub struct EnrichmentService {
    scheduler: Arc<BatchScheduler>,
    tracker: JobTracker,
    history: Arc<HistoryLog>,
    output_dir: PathBuf,
    running: Arc<Mutex<HashMap<JobId, RunningJob>>>,
}

impl EnrichmentService {
    pub fn new(config: &Config, client: Arc<dyn EnrichmentApi>) -> Self {
        let tracker = JobTracker::new();
        let history = Arc::new(HistoryLog::new(config.storage.history_file()));
        let scheduler = Arc::new(BatchScheduler::new(
            client,
            tracker.clone(),
            history.clone(),
            config.batch,
        ));

        Self {
            scheduler,
            tracker,
            history,
            output_dir: config.storage.output_dir(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a service backed by the HTTP enrichment client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = ApolloClient::new(config.api.endpoint.clone(), config.api.request_timeout)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Start enriching `input_path` in the background and return its job id.
    pub async fn submit(
        &self,
        input_path: impl Into<PathBuf>,
        original_name: impl Into<String>,
        api_key: ApiKey,
    ) -> Result<JobId> {
        let input_path = input_path.into();
        let original_name = original_name.into();
        let id = JobId::new();

        let output_path = self.output_dir.join(output_file_name(&original_name, id));
        self.tracker.register(id, original_name.clone()).await?;

        let job = JobSpec {
            id,
            input_path,
            output_path,
            original_name,
            api_key,
        };

        let cancel = CancellationToken::new();
        let scheduler = self.scheduler.clone();
        let running = self.running.clone();
        let token = cancel.clone();

        let mut jobs = self.running.lock().await;
        let handle = tokio::spawn(async move {
            let outcome = scheduler.run(job, token).await;
            running.lock().await.remove(&id);
            outcome
        });
        jobs.insert(
            id,
            RunningJob {
                cancel,
                handle: Some(handle),
            },
        );

        info!("Submitted job {}", id);
        Ok(id)
    }

    pub async fn poll(&self, id: JobId) -> JobPoll {
        self.tracker.poll(id).await
    }

    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.tracker.list().await
    }

    pub async fn logs(&self, id: JobId) -> Option<Vec<LogLine>> {
        self.tracker.logs(id).await
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.history.list_all().await
    }

    /// Request early termination. Returns `false` when the job is not running.
    pub async fn cancel(&self, id: JobId) -> bool {
        match self.running.lock().await.get(&id) {
            Some(job) => {
                info!("Cancelling job {}", id);
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a job to reach a terminal state.
    ///
    /// Returns `None` for unknown jobs, and for jobs that are still running
    /// while another caller is already waiting on them.
    pub async fn wait(&self, id: JobId) -> Option<JobOutcome> {
        let handle = self
            .running
            .lock()
            .await
            .get_mut(&id)
            .and_then(|job| job.handle.take());

        if let Some(handle) = handle {
            return match handle.await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!("Job task {} ended abnormally: {}", id, e);
                    Some(JobOutcome::Failed {
                        error: e.to_string(),
                    })
                }
            };
        }

        let snapshot = self.tracker.get(id).await?;
        match snapshot.status {
            JobStatus::Completed { output } => Some(JobOutcome::Completed {
                output: self.output_dir.join(output),
                rows_processed: snapshot.rows_processed,
            }),
            JobStatus::Failed { error } => Some(JobOutcome::Failed { error }),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }

    /// Resolve an output file name to its path, refusing anything that is
    /// not a plain file name.
    pub fn output_path(&self, file_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !file_name.ends_with(".part") => {
                Ok(self.output_dir.join(name))
            }
            _ => Err(Error::InvalidFileName(file_name.to_string())),
        }
    }
}

/// `output_{stem}_{timestamp}_{job}.csv`, with the stem reduced to safe
/// characters. The job suffix keeps names distinct for jobs submitted in the
/// same second.
pub fn output_file_name(original_name: &str, id: JobId) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.trim_matches('_').is_empty() {
        "input".to_string()
    } else {
        stem
    };

    format!(
        "output_{}_{}_{}.csv",
        stem,
        Local::now().format("%Y%m%d_%H%M%S"),
        id.short()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EnrichmentResult;
    use crate::config::BatchConfig;
    use crate::record::Record;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoClient;

    #[async_trait]
    impl EnrichmentApi for EchoClient {
        async fn enrich(
            &self,
            records: &[Record],
            _key: &ApiKey,
        ) -> Result<Vec<EnrichmentResult>> {
            Ok(records
                .iter()
                .map(|r| {
                    let domain = r.domain.as_deref().unwrap_or_default();
                    EnrichmentResult::Email(format!("info@{}", domain))
                })
                .collect())
        }
    }

    fn config(dir: &Path, delay: Duration) -> Config {
        let mut config = Config::new();
        config.storage.data_dir = dir.to_path_buf();
        config.batch = BatchConfig { size: 2, delay };
        config
    }

    #[test]
    fn test_output_file_name_shape() {
        let id = JobId::new();
        let name = output_file_name("Q3 leads (final).csv", id);
        assert!(name.starts_with("output_Q3_leads__final__"));
        assert!(name.ends_with(&format!("_{}.csv", id.short())));

        assert!(output_file_name("../..", id).starts_with("output_input_"));
        assert_ne!(
            output_file_name("leads.csv", JobId::new()),
            output_file_name("leads.csv", JobId::new())
        );
    }

    #[tokio::test]
    async fn test_same_name_jobs_write_separate_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let header = "First Name,Last Name,LinkedIn URL,Company Name,Company Website\n";
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        tokio::fs::write(&first, format!("{header}Ann,Lee,,,a.com\n"))
            .await
            .unwrap();
        tokio::fs::write(&second, format!("{header}Bob,Ray,,,b.com\nCy,Oh,,,c.com\n"))
            .await
            .unwrap();

        let service =
            EnrichmentService::new(&config(dir.path(), Duration::ZERO), Arc::new(EchoClient));
        let a = service
            .submit(&first, "leads.csv", ApiKey::new("k"))
            .await
            .unwrap();
        let b = service
            .submit(&second, "leads.csv", ApiKey::new("k"))
            .await
            .unwrap();

        let Some(JobOutcome::Completed { output: out_a, .. }) = service.wait(a).await else {
            panic!("first job should complete");
        };
        let Some(JobOutcome::Completed { output: out_b, .. }) = service.wait(b).await else {
            panic!("second job should complete");
        };
        assert_ne!(out_a, out_b);

        let written_a = tokio::fs::read_to_string(&out_a).await.unwrap();
        let written_b = tokio::fs::read_to_string(&out_b).await.unwrap();
        assert_eq!(written_a.lines().count(), 2);
        assert!(written_a.contains("Ann,Lee,,,a.com,info@a.com"));
        assert!(!written_a.contains("Bob"));
        assert_eq!(written_b.lines().count(), 3);
        assert!(written_b.contains("Cy,Oh,,,c.com,info@c.com"));
        assert!(!written_b.contains("Ann"));
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("leads.csv");
        tokio::fs::write(
            &input,
            "First Name,Last Name,LinkedIn URL,Company Name,Company Website\n\
             Ann,Lee,,Foo,foo.com\nBo,,,Bar,bar.com\nCy,Oh,,Baz,baz.com\n",
        )
        .await
        .unwrap();

        let service =
            EnrichmentService::new(&config(dir.path(), Duration::ZERO), Arc::new(EchoClient));
        let id = service
            .submit(&input, "leads.csv", ApiKey::new("k"))
            .await
            .unwrap();

        let outcome = service.wait(id).await.unwrap();
        let JobOutcome::Completed {
            output,
            rows_processed,
        } = outcome
        else {
            panic!("job should complete");
        };
        assert_eq!(rows_processed, 2);
        assert!(output.starts_with(dir.path().join("outputs")));

        let JobPoll::Completed { output: name } = service.poll(id).await else {
            panic!("poll should report completion");
        };
        assert_eq!(service.output_path(&name).unwrap(), output);

        let history = service.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, id);

        // Finished jobs cannot be cancelled; waiting again reads the tracker
        assert!(!service.cancel(id).await);
        assert!(matches!(
            service.wait(id).await,
            Some(JobOutcome::Completed {
                rows_processed: 2,
                ..
            })
        ));
        assert!(service.wait(JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("big.csv");
        let mut csv =
            String::from("First Name,Last Name,LinkedIn URL,Company Name,Company Website\n");
        for i in 0..20 {
            csv.push_str(&format!("A{i},B{i},,C,c{i}.com\n"));
        }
        tokio::fs::write(&input, csv).await.unwrap();

        let service = EnrichmentService::new(
            &config(dir.path(), Duration::from_secs(3600)),
            Arc::new(EchoClient),
        );
        let id = service
            .submit(&input, "big.csv", ApiKey::new("k"))
            .await
            .unwrap();

        assert!(service.cancel(id).await);
        let outcome = service.wait(id).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "Job cancelled".to_string()
            }
        );
        assert!(matches!(service.poll(id).await, JobPoll::Failed { .. }));
    }

    #[test]
    fn test_output_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let service =
            EnrichmentService::new(&config(dir.path(), Duration::ZERO), Arc::new(EchoClient));

        assert!(service.output_path("output_a.csv").is_ok());
        assert!(service.output_path("../secret.csv").is_err());
        assert!(service.output_path("/etc/passwd").is_err());
        assert!(service.output_path("sub/file.csv").is_err());
        assert!(service.output_path("output_a.csv.part").is_err());
        assert!(service.output_path("").is_err());
    }
}
