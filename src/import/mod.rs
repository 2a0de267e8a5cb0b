//! Row importer: streams a CSV/spreadsheet and upserts products in batches.
//!
//! Rows are pulled `chunk_size` at a time on the blocking pool, mapped
//! through the column dictionary and committed `batch_size` at a time. Each
//! batch is one catalog write, so a failure part-way leaves earlier batches
//! in place.

mod columns;
mod reader;

pub use columns::{normalize_heading, parse_price};
pub use reader::{RawRow, TabularReader};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::ProductCatalog;
use crate::error::ImportError;
use crate::models::Product;
use columns::{ColumnMap, RowOutcome};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub heading_row: bool,
    /// Heading of the column used as the upsert key.
    pub upsert_key: String,
    /// Rows read per blocking read.
    pub chunk_size: usize,
    /// Rows per catalog write.
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            heading_row: true,
            upsert_key: "unique_key".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Identity of the file being imported; passed to every step explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub file_name: String,
}

impl ImportContext {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_processed: u64,
    pub rows_failed: u64,
    pub batches: usize,
}

pub struct RowImporter {
    catalog: Arc<dyn ProductCatalog>,
    options: ImportOptions,
}

impl RowImporter {
    pub fn new(catalog: Arc<dyn ProductCatalog>, options: ImportOptions) -> Self {
        Self { catalog, options }
    }

    pub async fn import(
        &self,
        ctx: &ImportContext,
        path: &Path,
    ) -> Result<ImportSummary, ImportError> {
        let started = Instant::now();
        let chunk_size = self.options.chunk_size.max(1);
        let batch_size = self.options.batch_size.max(1);

        let (headers, mut reader) = {
            let path: PathBuf = path.to_path_buf();
            let file_name = ctx.file_name.clone();
            let heading_row = self.options.heading_row;
            tokio::task::spawn_blocking(move || {
                TabularReader::open(&path, &file_name, heading_row)
            })
            .await
            .map_err(|e| ImportError::parse(&ctx.file_name, format!("reader task failed: {e}")))??
        };

        let columns = ColumnMap::from_headers(&headers, &self.options.upsert_key).map_err(
            |missing| {
                ImportError::parse(
                    &ctx.file_name,
                    format!("missing required column(s): {}", missing.join(", ")),
                )
            },
        )?;

        let mut summary = ImportSummary::default();
        let mut pending: Vec<Product> = Vec::with_capacity(batch_size);
        // 1-based line number of the last row read, header included
        let mut line = usize::from(self.options.heading_row);

        loop {
            let (back, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = reader.read_chunk(chunk_size);
                (reader, chunk)
            })
            .await
            .map_err(|e| ImportError::parse(&ctx.file_name, format!("reader task failed: {e}")))?;
            reader = back;
            let chunk = chunk?;
            let exhausted = chunk.len() < chunk_size;

            for raw in &chunk {
                line += 1;
                match columns.to_product(raw) {
                    RowOutcome::Product(product) => {
                        pending.push(product);
                        if pending.len() >= batch_size {
                            self.flush(ctx, &mut pending, &mut summary).await?;
                        }
                    }
                    RowOutcome::MissingKey => {
                        summary.rows_failed += 1;
                        warn!(file_name = %ctx.file_name, line, "row has no {} value; skipped", self.options.upsert_key);
                    }
                    RowOutcome::Blank => {}
                }
            }

            if exhausted {
                break;
            }
        }

        if !pending.is_empty() {
            self.flush(ctx, &mut pending, &mut summary).await?;
        }

        info!(
            file_name = %ctx.file_name,
            rows = summary.rows_processed,
            failed = summary.rows_failed,
            batches = summary.batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "import finished"
        );
        Ok(summary)
    }

    async fn flush(
        &self,
        ctx: &ImportContext,
        pending: &mut Vec<Product>,
        summary: &mut ImportSummary,
    ) -> Result<(), ImportError> {
        let batch = summary.batches + 1;
        self.catalog
            .upsert_batch(pending)
            .await
            .map_err(|source| ImportError::Upsert {
                file_name: ctx.file_name.clone(),
                batch,
                source,
            })?;
        summary.batches = batch;
        summary.rows_processed += pending.len() as u64;
        debug!(file_name = %ctx.file_name, batch, rows = pending.len(), "batch committed");
        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::test_support::{write_csv, RecordingCatalog};

    fn csv_rows(n: usize) -> String {
        let mut body = String::from("unique_key,product_title,piece_price\n");
        for i in 0..n {
            body.push_str(&format!("K{i},Product {i},{}.99\n", i % 50));
        }
        body
    }

    #[tokio::test]
    async fn last_upsert_for_a_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "dupes.csv",
            "unique_key,product_title\nA,Shirt\nA,Shirt v2\n",
        );
        let catalog = Arc::new(MemoryCatalog::new());
        let importer = RowImporter::new(catalog.clone(), ImportOptions::default());
        let summary = importer
            .import(&ImportContext::new("dupes.csv"), &path)
            .await
            .unwrap();
        assert_eq!(summary.rows_processed, 2);
        let rows = catalog.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unique_key, "A");
        assert_eq!(rows[0].title.as_deref(), Some("Shirt v2"));
    }

    #[tokio::test]
    async fn reimporting_the_same_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "catalog.csv", &csv_rows(40));
        let catalog = Arc::new(MemoryCatalog::new());
        let importer = RowImporter::new(catalog.clone(), ImportOptions::default());
        let ctx = ImportContext::new("catalog.csv");

        importer.import(&ctx, &path).await.unwrap();
        let once = catalog.snapshot().await;
        importer.import(&ctx, &path).await.unwrap();
        let twice = catalog.snapshot().await;

        assert_eq!(once.len(), 40);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn rows_are_committed_in_fixed_size_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "big.csv", &csv_rows(2500));
        let catalog = Arc::new(RecordingCatalog::default());
        let importer = RowImporter::new(catalog.clone(), ImportOptions::default());

        let summary = importer
            .import(&ImportContext::new("big.csv"), &path)
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.rows_processed, 2500);
        assert_eq!(catalog.batch_sizes(), vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn batch_size_is_independent_of_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "mixed.csv", &csv_rows(25));
        let catalog = Arc::new(RecordingCatalog::default());
        let options = ImportOptions {
            chunk_size: 7,
            batch_size: 10,
            ..ImportOptions::default()
        };
        RowImporter::new(catalog.clone(), options)
            .import(&ImportContext::new("mixed.csv"), &path)
            .await
            .unwrap();
        assert_eq!(catalog.batch_sizes(), vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn keyless_rows_are_counted_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "gaps.csv",
            "unique_key,product_title\nA,One\n,Orphan\n,\nB,Two\n",
        );
        let catalog = Arc::new(MemoryCatalog::new());
        let summary = RowImporter::new(catalog.clone(), ImportOptions::default())
            .import(&ImportContext::new("gaps.csv"), &path)
            .await
            .unwrap();
        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.rows_failed, 1);
        assert_eq!(catalog.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_required_column_fails_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "nokey.csv", "sku,product_title\nA,One\n");
        let catalog = Arc::new(RecordingCatalog::default());
        let err = RowImporter::new(catalog.clone(), ImportOptions::default())
            .import(&ImportContext::new("nokey.csv"), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
        assert!(err.to_string().contains("unique_key"));
        assert!(catalog.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn workbook_rows_land_in_the_catalog() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/products.xlsx");
        let catalog = Arc::new(MemoryCatalog::new());
        let summary = RowImporter::new(catalog.clone(), ImportOptions::default())
            .import(&ImportContext::new("products.xlsx"), &path)
            .await
            .unwrap();
        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.rows_failed, 1);

        let keys: Vec<String> = catalog
            .snapshot()
            .await
            .into_iter()
            .map(|p| p.unique_key)
            .collect();
        assert_eq!(keys, vec!["12345", "K2"]);
        let tee = catalog.find_by_key("12345").await.unwrap().unwrap();
        assert_eq!(tee.title.as_deref(), Some("Tee"));
        assert_eq!(tee.price, parse_price("9.5"));
        let hood = catalog.find_by_key("K2").await.unwrap().unwrap();
        assert_eq!(hood.price, None);
    }

    #[tokio::test]
    async fn failed_batch_keeps_earlier_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "partial.csv", &csv_rows(25));
        let catalog = Arc::new(RecordingCatalog::failing_on_batch(2));
        let options = ImportOptions {
            batch_size: 10,
            ..ImportOptions::default()
        };
        let err = RowImporter::new(catalog.clone(), options)
            .import(&ImportContext::new("partial.csv"), &path)
            .await
            .unwrap_err();
        match err {
            ImportError::Upsert { batch, .. } => assert_eq!(batch, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(catalog.committed_rows(), 10);
    }
}
