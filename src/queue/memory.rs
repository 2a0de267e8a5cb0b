use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use super::{JobQueue, QueueStatus, QueuedJob};
use crate::job::ImportJob;

struct Entry {
    job: ImportJob,
    status: QueueStatus,
    attempts: i32,
    locked_at: Option<Instant>,
    locked_by: Option<String>,
    last_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<i64, Entry>,
}

/// FIFO queue held in process memory.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status_of(&self, id: i64) -> Option<QueueStatus> {
        self.inner.lock().await.jobs.get(&id).map(|e| e.status)
    }

    pub async fn last_error(&self, id: i64) -> Option<String> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&id)
            .and_then(|e| e.last_error.clone())
    }

    pub async fn pending(&self) -> usize {
        self.inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|e| e.status == QueueStatus::Queued)
            .count()
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ImportJob) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.jobs.insert(
            id,
            Entry {
                job: job.clone(),
                status: QueueStatus::Queued,
                attempts: 0,
                locked_at: None,
                locked_by: None,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>> {
        let mut inner = self.inner.lock().await;
        let Some((&id, entry)) = inner
            .jobs
            .iter_mut()
            .find(|(_, e)| e.status == QueueStatus::Queued)
        else {
            return Ok(None);
        };
        entry.status = QueueStatus::Running;
        entry.attempts += 1;
        entry.locked_at = Some(Instant::now());
        entry.locked_by = Some(worker_id.to_string());
        Ok(Some(QueuedJob {
            id,
            job: entry.job.clone(),
            attempts: entry.attempts,
        }))
    }

    async fn complete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get_mut(&id) else {
            bail!("no queued job with id {id}");
        };
        entry.status = QueueStatus::Done;
        entry.last_error = None;
        Ok(())
    }

    async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get_mut(&id) else {
            bail!("no queued job with id {id}");
        };
        entry.status = QueueStatus::Failed;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for entry in inner.jobs.values_mut() {
            let stale = entry.status == QueueStatus::Running
                && entry.locked_at.is_some_and(|t| t.elapsed() >= older_than);
            if stale {
                entry.status = QueueStatus::Queued;
                entry.locked_at = None;
                entry.locked_by = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_in_enqueue_order() {
        let queue = MemoryJobQueue::new();
        let a = queue.enqueue(&ImportJob::new("uploads/a.csv")).await.unwrap();
        let b = queue.enqueue(&ImportJob::new("uploads/b.csv")).await.unwrap();

        let first = queue.claim_next("w1").await.unwrap().unwrap();
        let second = queue.claim_next("w2").await.unwrap().unwrap();
        assert_eq!((first.id, second.id), (a, b));
        assert_eq!(first.job.file_name(), "a.csv");
        assert_eq!(first.attempts, 1);
        assert!(queue.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_and_fail_are_terminal() {
        let queue = MemoryJobQueue::new();
        let ok = queue.enqueue(&ImportJob::new("uploads/ok.csv")).await.unwrap();
        let bad = queue.enqueue(&ImportJob::new("uploads/bad.csv")).await.unwrap();
        queue.claim_next("w").await.unwrap();
        queue.claim_next("w").await.unwrap();

        queue.complete(ok).await.unwrap();
        queue.fail(bad, "file does not exist").await.unwrap();

        assert_eq!(queue.status_of(ok).await, Some(QueueStatus::Done));
        assert_eq!(queue.status_of(bad).await, Some(QueueStatus::Failed));
        assert_eq!(
            queue.last_error(bad).await.as_deref(),
            Some("file does not exist")
        );
        assert_eq!(queue.requeue_stale(Duration::ZERO).await.unwrap(), 0);
        assert!(queue.complete(99).await.is_err());
    }

    #[tokio::test]
    async fn stale_running_jobs_are_released() {
        let queue = MemoryJobQueue::new();
        let id = queue.enqueue(&ImportJob::new("uploads/a.csv")).await.unwrap();
        queue.claim_next("crashed").await.unwrap();

        assert_eq!(
            queue.requeue_stale(Duration::from_secs(3600)).await.unwrap(),
            0
        );
        assert_eq!(queue.requeue_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(queue.status_of(id).await, Some(QueueStatus::Queued));

        let again = queue.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }
}
