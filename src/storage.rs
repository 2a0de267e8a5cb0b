//! Blob store for uploaded files, keyed by a relative path such as
//! `uploads/1700000000_products.csv`.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ImportError;

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Absolute readable location of `file_ref`, or `NotFound`.
    async fn resolve(&self, file_ref: &str) -> Result<PathBuf, ImportError>;

    async fn put(&self, file_ref: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Files under a root directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join `file_ref` under the root, refusing anything that climbs out of it.
    fn path_for(&self, file_ref: &str) -> Option<PathBuf> {
        let rel = Path::new(file_ref.trim());
        if rel.as_os_str().is_empty() {
            return None;
        }
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }
}

/// Last path segment of a reference; the correlation key used by history
/// records and notifications.
pub fn file_name_of(file_ref: &str) -> String {
    Path::new(file_ref.trim())
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| file_ref.trim().to_string())
}

#[async_trait::async_trait]
impl BlobStore for LocalDiskStore {
    async fn resolve(&self, file_ref: &str) -> Result<PathBuf, ImportError> {
        let not_found = || ImportError::NotFound {
            file_ref: file_ref.to_string(),
        };
        let path = self.path_for(file_ref).ok_or_else(not_found)?;
        match tokio::fs::metadata(&path).await {
            // the root may be relative to the working directory
            Ok(meta) if meta.is_file() => tokio::fs::canonicalize(&path)
                .await
                .map_err(|_| not_found()),
            _ => Err(not_found()),
        }
    }

    async fn put(&self, file_ref: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self
            .path_for(file_ref)
            .with_context(|| format!("invalid storage reference {file_ref:?}"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
