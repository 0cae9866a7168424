//! Message bus ports
//!
//! Commands arrive as raw JSON strings on the request topic; responses and
//! domain events leave through an [`EventPublisher`].

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::BusConfig;
use crate::error::Result;

pub use memory::InProcessBus;

/// Publish-only, fire-and-forget channel to named topics.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// Publish and log instead of failing; events have no caller waiting on them.
pub async fn publish_or_warn<P, T>(publisher: &P, topic: &str, event: &T)
where
    P: EventPublisher + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = match serde_json::to_value(event) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to serialize event for {}: {}", topic, e);
            return;
        }
    };
    if let Err(e) = publisher.publish(topic, &payload).await {
        warn!("Failed to publish to {}: {}", topic, e);
    }
}

/// Event domains, one topic each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Auth,
    Orders,
    Portfolio,
    Ticks,
}

impl Topic {
    pub fn suffix(&self) -> &'static str {
        match self {
            Topic::Auth => "auth",
            Topic::Orders => "orders",
            Topic::Portfolio => "portfolio",
            Topic::Ticks => "ticks",
        }
    }
}

/// Resolved topic names for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub requests: String,
    pub responses: String,
    prefix: String,
}

impl Topics {
    pub fn new(requests: &str, responses: &str, event_prefix: &str) -> Self {
        Self {
            requests: requests.to_string(),
            responses: responses.to_string(),
            prefix: event_prefix.trim_end_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(
            &config.request_topic,
            &config.response_topic,
            &config.event_prefix,
        )
    }

    pub fn event(&self, topic: Topic) -> String {
        if self.prefix.is_empty() {
            topic.suffix().to_string()
        } else {
            format!("{}.{}", self.prefix, topic.suffix())
        }
    }

    /// Every topic a bus client may want to follow.
    pub fn outbound(&self) -> Vec<String> {
        let mut all = vec![self.responses.clone()];
        all.extend(
            [Topic::Auth, Topic::Orders, Topic::Portfolio, Topic::Ticks]
                .into_iter()
                .map(|t| self.event(t)),
        );
        all
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("blitz.requests", "blitz.responses", "zerodha")
    }
}
