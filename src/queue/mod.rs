//! Durable queue of import jobs.
//!
//! A claimed job is `running` until the worker reports the supervisor's
//! outcome. Retries happen inside the supervisor, so `fail` is terminal.

mod memory;
mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::job::ImportJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Running => "running",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "running" => Ok(QueueStatus::Running),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(anyhow!("unknown queue status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: i64,
    pub job: ImportJob,
    /// Claims so far, this one included.
    pub attempts: i32,
}

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &ImportJob) -> Result<i64>;

    /// Oldest queued job, marked `running` and locked by `worker_id`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>>;

    async fn complete(&self, id: i64) -> Result<()>;

    async fn fail(&self, id: i64, error: &str) -> Result<()>;

    /// Puts `running` jobs whose lock is older than `older_than` back in the
    /// queue. Returns how many were released.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64>;
}
