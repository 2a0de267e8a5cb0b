use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::RwLock;

use super::HistoryStore;
use crate::models::{FileStatus, History};

#[derive(Default)]
struct Inner {
    next_id: i64,
    by_name: HashMap<String, History>,
}

/// Process-local status store for `run-local` and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    inner: RwLock<Inner>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn newest_first(mut rows: Vec<History>) -> Vec<History> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    rows
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn find_by_file_name(&self, file_name: &str) -> Result<Option<History>> {
        Ok(self.inner.read().await.by_name.get(file_name).cloned())
    }

    async fn update_status(&self, file_name: &str, status: FileStatus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.by_name.get_mut(file_name) {
            Some(row) => {
                row.status = status;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_or_update(&self, file_name: &str, status: FileStatus) -> Result<History> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if let Some(row) = inner.by_name.get_mut(file_name) {
            row.status = status;
            row.updated_at = now;
            return Ok(row.clone());
        }
        inner.next_id += 1;
        let row = History {
            id: inner.next_id,
            file_name: file_name.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        inner.by_name.insert(file_name.to_string(), row.clone());
        Ok(row)
    }

    async fn list_recent(&self) -> Result<Vec<History>> {
        let rows = self.inner.read().await.by_name.values().cloned().collect();
        Ok(newest_first(rows))
    }

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<History>> {
        let rows = self
            .inner
            .read()
            .await
            .by_name
            .values()
            .filter(|h| h.status == status)
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }
}
