use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::RwLock;

use super::ProductCatalog;
use crate::models::Product;

#[derive(Default)]
pub struct MemoryCatalog {
    rows: RwLock<HashMap<String, Product>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<Product> {
        let mut rows: Vec<Product> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.unique_key.cmp(&b.unique_key));
        rows
    }
}

#[async_trait::async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn upsert_batch(&self, rows: &[Product]) -> Result<u64> {
        let mut guard = self.rows.write().await;
        let mut touched = std::collections::HashSet::new();
        for row in rows {
            touched.insert(row.unique_key.as_str());
            guard.insert(row.unique_key.clone(), row.clone());
        }
        Ok(touched.len() as u64)
    }

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Product>> {
        Ok(self.rows.read().await.get(unique_key).cloned())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().await.len() as u64)
    }
}
