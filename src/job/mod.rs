//! Import orchestrator: one attempt at importing one uploaded file.
//!
//! Attempt order: mark `processing` and announce it, resolve the file, run
//! the row importer, then the completion hook. The failure hook is invoked
//! by the retry supervisor (`runner`) once no further attempt will be made.

mod runner;

pub use runner::{run_with_retry, JobOutcome, RetryPolicy};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ImportError;
use crate::history::HistoryStore;
use crate::import::{ImportContext, ImportSummary, RowImporter};
use crate::models::{FileStatus, History};
use crate::notify::{publish_best_effort, ImportEvent, Publisher};
use crate::storage::{file_name_of, BlobStore};

pub const JOB_KIND: &str = "products.import";
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue payload. The reference must resolve to exactly one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    pub file_ref: String,
}

impl ImportJob {
    pub fn new(file_ref: impl Into<String>) -> Self {
        Self {
            file_ref: file_ref.into(),
        }
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.file_ref)
    }

    pub fn context(&self) -> ImportContext {
        ImportContext::new(self.file_name())
    }
}

pub struct ImportOrchestrator {
    history: Arc<dyn HistoryStore>,
    storage: Arc<dyn BlobStore>,
    importer: RowImporter,
    publisher: Arc<dyn Publisher>,
    notify_timeout: Duration,
}

impl ImportOrchestrator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        storage: Arc<dyn BlobStore>,
        importer: RowImporter,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            history,
            storage,
            importer,
            publisher,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_notify_timeout(mut self, limit: Duration) -> Self {
        self.notify_timeout = limit;
        self
    }

    async fn notify(&self, event: ImportEvent) {
        publish_best_effort(self.publisher.as_ref(), &event, self.notify_timeout).await;
    }

    pub async fn run_attempt(
        &self,
        job: &ImportJob,
        attempt: u32,
    ) -> Result<ImportSummary, ImportError> {
        let ctx = job.context();

        let tracked = self
            .history
            .update_status(&ctx.file_name, FileStatus::Processing)
            .await
            .map_err(ImportError::Store)?;
        if !tracked {
            warn!(file_name = %ctx.file_name, "no history record for file; continuing without one");
        }
        self.notify(ImportEvent::Processing {
            file_name: ctx.file_name.clone(),
        })
        .await;

        let path = self.storage.resolve(&job.file_ref).await?;
        info!(file_name = %ctx.file_name, attempt, path = %path.display(), "starting import");

        let started = Instant::now();
        let summary = self.importer.import(&ctx, &path).await?;
        info!(
            file_name = %ctx.file_name,
            attempt,
            duration_ms = started.elapsed().as_millis() as u64,
            rows = summary.rows_processed,
            "import completed"
        );

        self.on_complete(&ctx, &summary).await?;
        Ok(summary)
    }

    /// Marks the file `completed`, creating the history record when the
    /// upload never wrote one, and announces it with the record id.
    pub async fn on_complete(
        &self,
        ctx: &ImportContext,
        summary: &ImportSummary,
    ) -> Result<History, ImportError> {
        let existing = self
            .history
            .find_by_file_name(&ctx.file_name)
            .await
            .map_err(ImportError::Store)?;
        let record = match existing {
            Some(mut record) => {
                self.history
                    .update_status(&ctx.file_name, FileStatus::Completed)
                    .await
                    .map_err(ImportError::Store)?;
                record.status = FileStatus::Completed;
                record
            }
            None => {
                warn!(file_name = %ctx.file_name, "history record missing at completion; creating it");
                self.history
                    .create_or_update(&ctx.file_name, FileStatus::Completed)
                    .await
                    .map_err(ImportError::Store)?
            }
        };

        info!(
            file_name = %ctx.file_name,
            file_id = record.id,
            failed_rows = summary.rows_failed,
            "file marked completed"
        );
        self.notify(ImportEvent::Completed {
            file_name: ctx.file_name.clone(),
            file_id: record.id,
        })
        .await;
        Ok(record)
    }

    /// Terminal failure path. Never fails itself; every step is best effort.
    pub async fn on_failure(&self, ctx: &ImportContext, err: &ImportError) {
        error!(file_name = %ctx.file_name, kind = err.kind(), error = %err, "import job failed");

        let file_id = match self.history.find_by_file_name(&ctx.file_name).await {
            Ok(found) => found.map(|h| h.id).unwrap_or(0),
            Err(e) => {
                warn!(file_name = %ctx.file_name, error = %e, "could not resolve history record");
                0
            }
        };
        match self
            .history
            .update_status(&ctx.file_name, FileStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(file_name = %ctx.file_name, "no history record to mark failed")
            }
            Err(e) => {
                error!(file_name = %ctx.file_name, error = %e, "failed to record failed status")
            }
        }

        self.notify(ImportEvent::Failed {
            file_name: ctx.file_name.clone(),
            file_id,
            error: err.to_string(),
        })
        .await;
    }
}
