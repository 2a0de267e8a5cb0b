use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{types::Json, PgPool, Row};
use tracing::warn;

use super::{JobQueue, QueuedJob};
use crate::job::{ImportJob, JOB_KIND};

/// `import_jobs` table, claimed with `FOR UPDATE SKIP LOCKED` so several
/// workers can poll the same table.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &ImportJob) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO import_jobs (kind, payload) VALUES ($1, $2) RETURNING id",
        )
        .persistent(false)
        .bind(JOB_KIND)
        .bind(Json(job))
        .fetch_one(&self.pool)
        .await
        .context("enqueue import job")?;
        Ok(row.get("id"))
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>> {
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "SELECT id, payload FROM import_jobs \
             WHERE status='queued' AND kind = $1 AND scheduled_at <= now() \
             ORDER BY scheduled_at ASC, id ASC \
             FOR UPDATE SKIP LOCKED LIMIT 1",
        )
        .persistent(false)
        .bind(JOB_KIND)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = rec else {
            tx.rollback().await?;
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let payload: Value = row.get("payload");

        let job: ImportJob = match serde_json::from_value(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = id, error = %e, "undecodable job payload; marking failed");
                sqlx::query(
                    "UPDATE import_jobs SET status='failed', last_error=$2, finished_at=now(), updated_at=now() \
                     WHERE id=$1",
                )
                .persistent(false)
                .bind(id)
                .bind(format!("invalid payload: {e}"))
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(None);
            }
        };

        let attempts: i32 = sqlx::query_scalar(
            "UPDATE import_jobs \
             SET status='running', locked_at=now(), locked_by=$2, attempts=attempts+1, \
                 started_at = COALESCE(started_at, now()), updated_at=now() \
             WHERE id=$1 RETURNING attempts",
        )
        .persistent(false)
        .bind(id)
        .bind(worker_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(QueuedJob { id, job, attempts }))
    }

    async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE import_jobs SET status='done', finished_at=now(), updated_at=now(), \
             locked_at=NULL, locked_by=NULL, last_error=NULL WHERE id=$1",
        )
        .persistent(false)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("mark job {id} done"))?;
        Ok(())
    }

    async fn fail(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE import_jobs SET status='failed', finished_at=now(), updated_at=now(), \
             locked_at=NULL, locked_by=NULL, last_error=$2 WHERE id=$1",
        )
        .persistent(false)
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("mark job {id} failed"))?;
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let done = sqlx::query(
            "UPDATE import_jobs \
             SET status='queued', locked_at=NULL, locked_by=NULL, updated_at=now() \
             WHERE status='running' AND locked_at < now() - make_interval(secs => $1)",
        )
        .persistent(false)
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("requeue stale import jobs")?;
        Ok(done.rows_affected())
    }
}
