//! Upload intake: persist the bytes, record `pending`, enqueue the import.

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::history::HistoryStore;
use crate::job::ImportJob;
use crate::models::FileStatus;
use crate::queue::JobQueue;
use crate::storage::{file_name_of, BlobStore};

pub const UPLOAD_DIR: &str = "uploads";
pub const ACCEPTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("unsupported file type for {file_name}; expected one of: csv, xlsx, xls")]
    UnsupportedType { file_name: String },

    #[error("upload has no usable file name")]
    MissingName,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub file_ref: String,
    pub file_name: String,
    pub history_id: i64,
    pub job_id: i64,
}

/// `uploads/{unix_ts}_{original}`; directories in `original` are dropped.
pub fn stored_file_ref(original: &str, unix_ts: i64) -> Result<String, IntakeError> {
    let base = file_name_of(original);
    if base.is_empty() || base == "." || base == ".." {
        return Err(IntakeError::MissingName);
    }
    let ext = base
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(IntakeError::UnsupportedType { file_name: base });
    }
    Ok(format!("{UPLOAD_DIR}/{unix_ts}_{base}"))
}

pub async fn submit_upload(
    storage: &dyn BlobStore,
    history: &dyn HistoryStore,
    queue: &dyn JobQueue,
    original_name: &str,
    bytes: &[u8],
) -> Result<Submission, IntakeError> {
    let file_ref = stored_file_ref(original_name, Utc::now().timestamp())?;
    storage.put(&file_ref, bytes).await?;

    let job = ImportJob::new(file_ref.clone());
    let file_name = job.file_name();
    let record = history
        .create_or_update(&file_name, FileStatus::Pending)
        .await?;
    let job_id = queue.enqueue(&job).await?;

    info!(file_name = %file_name, history_id = record.id, job_id, bytes = bytes.len(), "upload accepted");
    Ok(Submission {
        file_ref,
        file_name,
        history_id: record.id,
        job_id,
    })
}
