//! Status store: one `History` row per uploaded file name.
//!
//! The store records whatever status it is told. Transition discipline
//! belongs to the orchestrator, so nothing here rejects a backwards move.

mod memory;
mod postgres;

pub use memory::MemoryHistoryStore;
pub use postgres::PgHistoryStore;

use anyhow::Result;

use crate::models::{FileStatus, History};

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn find_by_file_name(&self, file_name: &str) -> Result<Option<History>>;

    /// Returns `false` without creating anything when no record exists.
    async fn update_status(&self, file_name: &str, status: FileStatus) -> Result<bool>;

    async fn create_or_update(&self, file_name: &str, status: FileStatus) -> Result<History>;

    /// Newest `created_at` first.
    async fn list_recent(&self) -> Result<Vec<History>>;

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<History>>;
}
