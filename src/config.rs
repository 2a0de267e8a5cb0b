use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::MAX_ROWS_PER_STATEMENT;
use crate::import::ImportOptions;
use crate::job::{RetryPolicy, DEFAULT_NOTIFY_TIMEOUT};
use crate::util::env::{env_opt, env_parse, env_secs_list};
use crate::worker::WorkerConfig;

/// Everything the binary needs besides the database URL.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub storage_root: PathBuf,
    pub import: ImportOptions,
    pub retry: RetryPolicy,
    pub notify_timeout: Duration,
    pub worker: WorkerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./storage"),
            import: ImportOptions::default(),
            retry: RetryPolicy::default(),
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            worker: WorkerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let import = ImportOptions {
            chunk_size: env_parse("IMPORT_CHUNK_SIZE", d.import.chunk_size).max(1),
            // one batch stays one statement
            batch_size: env_parse("IMPORT_BATCH_SIZE", d.import.batch_size)
                .clamp(1, MAX_ROWS_PER_STATEMENT),
            upsert_key: env_opt("IMPORT_UPSERT_KEY").unwrap_or(d.import.upsert_key),
            heading_row: d.import.heading_row,
        };

        let retry = RetryPolicy {
            tries: env_parse("IMPORT_JOB_TRIES", d.retry.tries).max(1),
            backoff: env_secs_list("IMPORT_JOB_BACKOFF_SECS").unwrap_or(d.retry.backoff),
            timeout: Duration::from_secs(
                env_parse("IMPORT_JOB_TIMEOUT_SECS", d.retry.timeout.as_secs()).max(1),
            ),
        };

        let stale_secs: u64 = env_parse(
            "WORKER_STALE_AFTER_SECS",
            d.worker.stale_after.map(|s| s.as_secs()).unwrap_or(0),
        );
        let worker = WorkerConfig {
            worker_id: env_opt("WORKER_ID").unwrap_or(d.worker.worker_id),
            concurrency: env_parse("WORKER_CONCURRENCY", d.worker.concurrency).max(1),
            poll_interval: Duration::from_secs(
                env_parse("WORKER_POLL_INTERVAL_SECS", d.worker.poll_interval.as_secs()).max(1),
            ),
            error_backoff: Duration::from_secs(env_parse(
                "WORKER_ERROR_BACKOFF_SECS",
                d.worker.error_backoff.as_secs(),
            )),
            // 0 disables
            stale_after: (stale_secs > 0).then(|| Duration::from_secs(stale_secs)),
        };

        Self {
            storage_root: env_opt("IMPORT_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(d.storage_root),
            import,
            retry,
            notify_timeout: Duration::from_millis(env_parse(
                "NOTIFY_TIMEOUT_MS",
                d.notify_timeout.as_millis() as u64,
            )),
            worker,
        }
    }

    /// Stale-lock limit must outlast a job's whole retry budget, or a slow
    /// job would be handed to a second worker while still running.
    pub fn effective_stale_after(&self) -> Option<Duration> {
        let limit = self.worker.stale_after?;
        let budget = self.retry.timeout * self.retry.tries
            + self
                .retry
                .backoff
                .iter()
                .take(self.retry.tries.saturating_sub(1) as usize)
                .sum::<Duration>();
        Some(limit.max(budget))
    }
}
