//! Worker pool: claims import jobs and runs each through the retry
//! supervisor, up to `concurrency` at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::job::{run_with_retry, ImportOrchestrator, JobOutcome, RetryPolicy};
use crate::queue::{JobQueue, QueuedJob};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// `None` disables releasing jobs left `running` by dead workers.
    pub stale_after: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("pid-{}", std::process::id()),
            concurrency: 1,
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            stale_after: Some(Duration::from_secs(900)),
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<ImportOrchestrator>,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<ImportOrchestrator>,
        policy: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            policy,
            config,
        }
    }

    /// Polls until `shutdown` flips to true, then waits for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        info!(
            worker_id = %self.config.worker_id,
            concurrency,
            poll_secs = self.config.poll_interval.as_secs(),
            "import worker started"
        );

        let mut set: JoinSet<()> = JoinSet::new();
        // `interval` panics on a zero period
        let mut ticker = interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            while set.len() < concurrency {
                match self.queue.claim_next(&self.config.worker_id).await {
                    Ok(Some(claimed)) => {
                        let worker = self.clone();
                        set.spawn(async move { worker.process(claimed).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "error claiming job; backing off");
                        tokio::time::sleep(self.config.error_backoff).await;
                        break;
                    }
                }
            }

            tokio::select! {
                Some(res) = set.join_next(), if !set.is_empty() => {
                    if let Err(join_err) = res {
                        error!(error = %join_err, "worker task panicked");
                    }
                }
                _ = ticker.tick() => {
                    self.release_stale().await;
                    if set.is_empty() {
                        debug!(worker_id = %self.config.worker_id, "idle tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = set.len(), "shutting down; waiting for running jobs");
        while let Some(res) = set.join_next().await {
            if let Err(join_err) = res {
                error!(error = %join_err, "worker task panicked");
            }
        }
        Ok(())
    }

    /// Runs queued jobs one by one until the queue is empty. Returns how
    /// many jobs were processed.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some(claimed) = self.queue.claim_next(&self.config.worker_id).await? {
            self.process(claimed).await;
            processed += 1;
        }
        Ok(processed)
    }

    async fn release_stale(&self) {
        let Some(limit) = self.config.stale_after else {
            return;
        };
        match self.queue.requeue_stale(limit).await {
            Ok(0) => {}
            Ok(n) => warn!(released = n, "re-queued jobs with stale locks"),
            Err(e) => warn!(error = %e, "could not re-queue stale jobs"),
        }
    }

    async fn process(&self, claimed: QueuedJob) {
        let job_id = claimed.id;
        let file_name = claimed.job.file_name();
        info!(job_id, file_name = %file_name, claims = claimed.attempts, worker = %self.config.worker_id, "processing job");

        match run_with_retry(&self.orchestrator, &claimed.job, &self.policy).await {
            JobOutcome::Completed { summary, attempts } => {
                if let Err(db_err) = self.queue.complete(job_id).await {
                    error!(job_id, error = %db_err, "failed to mark job complete");
                } else {
                    info!(job_id, file_name = %file_name, attempts, rows = summary.rows_processed, "job completed");
                }
            }
            JobOutcome::Failed { error: err, attempts } => {
                error!(job_id, file_name = %file_name, attempts, error = %err, "job failed");
                if let Err(db_err) = self.queue.fail(job_id, &err.to_string()).await {
                    error!(job_id, error = %db_err, "failed to record job failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::catalog::{MemoryCatalog, ProductCatalog};
    use crate::history::{HistoryStore, MemoryHistoryStore};
    use crate::import::{ImportOptions, RowImporter};
    use crate::job::ImportJob;
    use crate::models::FileStatus;
    use crate::notify::BroadcastPublisher;
    use crate::queue::{MemoryJobQueue, QueueStatus};
    use crate::storage::{BlobStore, LocalDiskStore};

    struct Setup {
        _dir: tempfile::TempDir,
        storage: Arc<LocalDiskStore>,
        history: Arc<MemoryHistoryStore>,
        catalog: Arc<MemoryCatalog>,
        queue: Arc<MemoryJobQueue>,
        worker: Worker,
    }

    fn setup(concurrency: usize) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalDiskStore::new(dir.path()));
        let history = Arc::new(MemoryHistoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let orchestrator = Arc::new(ImportOrchestrator::new(
            history.clone(),
            storage.clone(),
            RowImporter::new(catalog.clone(), ImportOptions::default()),
            Arc::new(BroadcastPublisher::new(16)),
        ));
        let policy = RetryPolicy {
            tries: 1,
            backoff: vec![],
            timeout: Duration::from_secs(10),
        };
        let config = WorkerConfig {
            worker_id: "test-worker".into(),
            concurrency,
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            stale_after: None,
        };
        let worker = Worker::new(queue.clone(), orchestrator, policy, config);
        Setup {
            _dir: dir,
            storage,
            history,
            catalog,
            queue,
            worker,
        }
    }

    #[tokio::test]
    async fn drain_records_queue_outcomes() {
        let s = setup(1);
        s.storage
            .put("uploads/good.csv", b"unique_key,product_title\nA,One\n")
            .await
            .unwrap();
        let good = s.queue.enqueue(&ImportJob::new("uploads/good.csv")).await.unwrap();
        let bad = s.queue.enqueue(&ImportJob::new("uploads/gone.csv")).await.unwrap();

        assert_eq!(s.worker.drain().await.unwrap(), 2);

        assert_eq!(s.queue.status_of(good).await, Some(QueueStatus::Done));
        assert_eq!(s.queue.status_of(bad).await, Some(QueueStatus::Failed));
        assert!(s
            .queue
            .last_error(bad)
            .await
            .unwrap()
            .contains("uploads/gone.csv"));
        assert_eq!(s.catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_processes_jobs_until_shutdown() {
        let s = setup(4);
        for i in 0..6 {
            let file_ref = format!("uploads/file{i}.csv");
            s.storage
                .put(&file_ref, format!("unique_key,product_title\nK{i},Item {i}\n").as_bytes())
                .await
                .unwrap();
            s.history
                .create_or_update(&format!("file{i}.csv"), FileStatus::Pending)
                .await
                .unwrap();
            s.queue.enqueue(&ImportJob::new(file_ref)).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let worker = s.worker.clone();
        let handle = tokio::spawn(async move { worker.run(rx).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while s.catalog.count().await.unwrap() < 6 {
            assert!(tokio::time::Instant::now() < deadline, "worker did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(s.queue.pending().await, 0);
        let completed = s
            .history
            .list_by_status(FileStatus::Completed)
            .await
            .unwrap();
        assert_eq!(completed.len(), 6);
    }

    #[tokio::test]
    async fn zero_poll_interval_still_runs() {
        let mut s = setup(1);
        s.worker.config.poll_interval = Duration::ZERO;
        s.storage
            .put("uploads/tick.csv", b"unique_key,product_title
T,Tick
")
            .await
            .unwrap();
        s.queue.enqueue(&ImportJob::new("uploads/tick.csv")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = s.worker.clone();
        let handle = tokio::spawn(async move { worker.run(rx).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while s.catalog.count().await.unwrap() < 1 {
            assert!(tokio::time::Instant::now() < deadline, "worker did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
