use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;

use super::Publisher;

/// Publishes through Postgres `NOTIFY`; the channel name is passed verbatim
/// to `pg_notify`, the body is `{"event": .., "data": ..}`.
#[derive(Clone)]
pub struct PgNotifyPublisher {
    pool: PgPool,
}

impl PgNotifyPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn envelope(event: &str, payload: &Value) -> String {
    json!({ "event": event, "data": payload }).to_string()
}

#[async_trait::async_trait]
impl Publisher for PgNotifyPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .persistent(false)
            .bind(channel)
            .bind(envelope(event, payload))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
