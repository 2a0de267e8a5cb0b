//! Shared fakes for unit tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use tempfile::TempDir;

use crate::catalog::{MemoryCatalog, ProductCatalog};
use crate::models::Product;
use crate::notify::{PublishedEvent, Publisher};

pub fn write_csv(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[derive(Clone, Copy, Default)]
enum FailMode {
    #[default]
    Never,
    /// 1-based write call, counted across every import using this catalog.
    OnCall(usize),
    Always,
}

/// Memory catalog that records batch sizes and can fail or stall on demand.
#[derive(Default)]
pub struct RecordingCatalog {
    inner: MemoryCatalog,
    fail: FailMode,
    delay: Option<Duration>,
    calls: Mutex<usize>,
    committed: Mutex<Vec<usize>>,
}

impl RecordingCatalog {
    pub fn failing_on_batch(call: usize) -> Self {
        Self {
            fail: FailMode::OnCall(call),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail: FailMode::Always,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.committed.lock().unwrap().clone()
    }

    pub fn committed_rows(&self) -> usize {
        self.committed.lock().unwrap().iter().sum()
    }
}

#[async_trait::async_trait]
impl ProductCatalog for RecordingCatalog {
    async fn upsert_batch(&self, rows: &[Product]) -> Result<u64> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail {
            FailMode::OnCall(n) if n == call => bail!("simulated write failure on call {call}"),
            FailMode::Always => bail!("simulated write failure"),
            _ => {}
        }
        let written = self.inner.upsert_batch(rows).await?;
        self.committed.lock().unwrap().push(rows.len());
        Ok(written)
    }

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Product>> {
        self.inner.find_by_key(unique_key).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn all(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, file_name: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|e| e.payload["fileName"] == file_name)
            .map(|e| e.event)
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.all().iter().filter(|e| e.event == event).count()
    }

    pub fn last(&self) -> Option<PublishedEvent> {
        self.all().pop()
    }
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<()> {
        self.events.lock().unwrap().push(PublishedEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
