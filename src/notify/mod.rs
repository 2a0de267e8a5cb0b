//! Lifecycle notifications for subscribers (UI sockets, log tailers, ...).
//!
//! Delivery is one attempt, fire-and-forget. Consumers must tolerate
//! duplicates and reordering across retried attempts.

mod broadcast;
mod pg;

pub use broadcast::{BroadcastPublisher, PublishedEvent};
pub use pg::PgNotifyPublisher;

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::FileStatus;

pub const PROCESSING_CHANNEL: &str = "file-processing";
pub const UPLOADED_CHANNEL: &str = "file-uploaded";

pub const EVENT_PROCESSING: &str = "file.processing";
pub const EVENT_COMPLETED: &str = "file.completed";
pub const EVENT_FAILED: &str = "file.failed";

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

/// The three transitions the orchestrator announces.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    Processing {
        file_name: String,
    },
    Completed {
        file_name: String,
        file_id: i64,
    },
    Failed {
        file_name: String,
        file_id: i64,
        error: String,
    },
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ImportEvent::Processing { .. } => EVENT_PROCESSING,
            ImportEvent::Completed { .. } => EVENT_COMPLETED,
            ImportEvent::Failed { .. } => EVENT_FAILED,
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            ImportEvent::Processing { .. } => PROCESSING_CHANNEL,
            ImportEvent::Completed { .. } | ImportEvent::Failed { .. } => UPLOADED_CHANNEL,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            ImportEvent::Processing { file_name }
            | ImportEvent::Completed { file_name, .. }
            | ImportEvent::Failed { file_name, .. } => file_name,
        }
    }

    pub fn payload_at(&self, ts: DateTime<Utc>) -> EventPayload {
        let timestamp = iso(ts);
        match self {
            ImportEvent::Processing { file_name } => EventPayload {
                file_name: file_name.clone(),
                file_id: None,
                status: FileStatus::Processing,
                error: None,
                timestamp,
            },
            ImportEvent::Completed { file_name, file_id } => EventPayload {
                file_name: file_name.clone(),
                file_id: Some(*file_id),
                status: FileStatus::Completed,
                error: None,
                timestamp,
            },
            ImportEvent::Failed {
                file_name,
                file_id,
                error,
            } => EventPayload {
                file_name: file_name.clone(),
                file_id: Some(*file_id),
                status: FileStatus::Failed,
                error: Some(error.clone()),
                timestamp,
            },
        }
    }
}

/// Publishes `event` with a bounded wait. Failures and timeouts are logged
/// and swallowed; a notification never decides a job's outcome.
pub async fn publish_best_effort(publisher: &dyn Publisher, event: &ImportEvent, limit: Duration) {
    let payload = match serde_json::to_value(event.payload_at(Utc::now())) {
        Ok(v) => v,
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode notification");
            return;
        }
    };
    match tokio::time::timeout(limit, publisher.publish(event.channel(), event.name(), &payload))
        .await
    {
        Ok(Ok(())) => {
            debug!(event = event.name(), file_name = event.file_name(), "notification published")
        }
        Ok(Err(e)) => {
            warn!(event = event.name(), file_name = event.file_name(), error = %e, "notification publish failed")
        }
        Err(_) => warn!(
            event = event.name(),
            file_name = event.file_name(),
            timeout_ms = limit.as_millis() as u64,
            "notification publish timed out"
        ),
    }
}
