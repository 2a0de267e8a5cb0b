use anyhow::Result;
use serde_json::Value;
use tokio::sync::broadcast;

use super::Publisher;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// In-process fan-out. Having no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<()> {
        // send only fails when nobody listens
        let _ = self.tx.send(PublishedEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
