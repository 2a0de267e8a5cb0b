//! Product catalog: the shared table every import writes into.

mod memory;
mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::{PgProductCatalog, MAX_ROWS_PER_STATEMENT};

use anyhow::Result;

use crate::models::Product;

#[async_trait::async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Insert-or-update every row by `unique_key` as one atomic write.
    /// Later rows in the slice win over earlier rows with the same key.
    /// Returns the number of distinct keys written.
    async fn upsert_batch(&self, rows: &[Product]) -> Result<u64>;

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Product>>;

    async fn count(&self) -> Result<u64>;
}
