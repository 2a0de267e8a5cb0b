use std::collections::HashMap;

use anyhow::Result;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{debug, instrument};

use super::ProductCatalog;
use crate::models::Product;

const BIND_COLUMNS: usize = 8;

/// Postgres caps one statement at 65535 bind parameters.
pub const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / BIND_COLUMNS;

#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Keep the last occurrence of each key, preserving file order otherwise.
/// A single `INSERT .. ON CONFLICT` may not touch the same row twice.
fn last_per_key(rows: &[Product]) -> Vec<&Product> {
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        last.insert(row.unique_key.as_str(), idx);
    }
    let mut keep: Vec<usize> = last.into_values().collect();
    keep.sort_unstable();
    keep.into_iter().map(|idx| &rows[idx]).collect()
}

#[async_trait::async_trait]
impl ProductCatalog for PgProductCatalog {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_batch(&self, rows: &[Product]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let uniques = last_per_key(rows);
        // oversized batches span several statements in one transaction
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for part in uniques.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO products (unique_key, product_title, product_description, style, sanmar_mainframe_color, size, color_name, piece_price) ",
            );
            qb.push_values(part.iter().copied(), |mut b, r| {
                b.push_bind(&r.unique_key)
                    .push_bind(&r.title)
                    .push_bind(&r.description)
                    .push_bind(&r.style)
                    .push_bind(&r.color_code)
                    .push_bind(&r.size)
                    .push_bind(&r.color_name)
                    .push_bind(&r.price);
            });
            qb.push(
                " ON CONFLICT (unique_key)
                  DO UPDATE SET product_title = EXCLUDED.product_title,
                                product_description = EXCLUDED.product_description,
                                style = EXCLUDED.style,
                                sanmar_mainframe_color = EXCLUDED.sanmar_mainframe_color,
                                size = EXCLUDED.size,
                                color_name = EXCLUDED.color_name,
                                piece_price = EXCLUDED.piece_price,
                                updated_at = now()",
            );
            let done = qb.build().persistent(false).execute(&mut *tx).await?;
            affected += done.rows_affected();
        }
        tx.commit().await?;
        debug!(
            distinct = uniques.len(),
            affected,
            "product batch upserted"
        );
        Ok(uniques.len() as u64)
    }

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT unique_key, product_title, product_description, style, sanmar_mainframe_color, size, color_name, piece_price \
             FROM products WHERE unique_key = $1",
        )
        .persistent(false)
        .bind(unique_key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Product {
            unique_key: row.try_get("unique_key")?,
            title: row.try_get("product_title")?,
            description: row.try_get("product_description")?,
            style: row.try_get("style")?,
            color_code: row.try_get("sanmar_mainframe_color")?,
            size: row.try_get("size")?,
            color_name: row.try_get("color_name")?,
            price: row.try_get("piece_price")?,
        }))
    }

    async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .persistent(false)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_last_occurrence_in_file_order() {
        let rows = vec![
            Product {
                title: Some("Shirt".into()),
                ..Product::new("A")
            },
            Product::new("B"),
            Product {
                title: Some("Shirt v2".into()),
                ..Product::new("A")
            },
        ];
        let kept = last_per_key(&rows);
        let keys: Vec<&str> = kept.iter().map(|p| p.unique_key.as_str()).collect();
        assert_eq!(keys, vec!["B", "A"]);
        assert_eq!(kept[1].title.as_deref(), Some("Shirt v2"));
    }

    #[test]
    fn statement_rows_stay_under_the_bind_limit() {
        assert_eq!(MAX_ROWS_PER_STATEMENT, 8191);
        assert!(MAX_ROWS_PER_STATEMENT * BIND_COLUMNS <= u16::MAX as usize);
        let rows: Vec<Product> = (0..20_000).map(|i| Product::new(format!("K{i}"))).collect();
        let uniques = last_per_key(&rows);
        let parts: Vec<usize> = uniques
            .chunks(MAX_ROWS_PER_STATEMENT)
            .map(|c| c.len())
            .collect();
        assert_eq!(parts, vec![8191, 8191, 3618]);
    }
}
