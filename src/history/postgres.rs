use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use super::HistoryStore;
use crate::models::{FileStatus, History};

const COLUMNS: &str = "id, file_name, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    file_name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for History {
    type Error = anyhow::Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(History {
            id: row.id,
            status: row
                .status
                .parse()
                .with_context(|| format!("histories.id={} has bad status", row.id))?,
            file_name: row.file_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect(rows: Vec<HistoryRow>) -> Result<Vec<History>> {
    rows.into_iter().map(History::try_from).collect()
}

#[async_trait::async_trait]
impl HistoryStore for PgHistoryStore {
    #[instrument(skip(self))]
    async fn find_by_file_name(&self, file_name: &str) -> Result<Option<History>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {COLUMNS} FROM histories WHERE file_name = $1"
        ))
        .persistent(false)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(History::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn update_status(&self, file_name: &str, status: FileStatus) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE histories SET status = $2, updated_at = now() WHERE file_name = $1",
        )
        .persistent(false)
        .bind(file_name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn create_or_update(&self, file_name: &str, status: FileStatus) -> Result<History> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "INSERT INTO histories (file_name, status) VALUES ($1, $2) \
             ON CONFLICT (file_name) DO UPDATE SET status = EXCLUDED.status, updated_at = now() \
             RETURNING {COLUMNS}"
        ))
        .persistent(false)
        .bind(file_name)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        History::try_from(row)
    }

    async fn list_recent(&self) -> Result<Vec<History>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {COLUMNS} FROM histories ORDER BY created_at DESC, id DESC"
        ))
        .persistent(false)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<History>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {COLUMNS} FROM histories WHERE status = $1 ORDER BY created_at DESC, id DESC"
        ))
        .persistent(false)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}
