use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::EventPublisher;
use crate::error::Result;

/// In-process topic bus over tokio broadcast channels.
///
/// Topics are created lazily; publishing to a topic nobody listens on is not an error.
#[derive(Debug)]
pub struct InProcessBus {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.sender(topic).subscribe()
    }

    /// Send an already-encoded message; returns how many subscribers saw it.
    pub fn send_raw(&self, topic: &str, message: String) -> usize {
        match self.sender(topic).send(message) {
            Ok(n) => n,
            Err(_) => {
                trace!("No subscribers on {}", topic);
                0
            }
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for InProcessBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let message = serde_json::to_string(payload)?;
        self.send_raw(topic, message);
        Ok(())
    }
}
