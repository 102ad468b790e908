//! The publisher port (§4.6): a single long-lived outbound connection to the
//! broker, used by the automation engine's device-command actions.
//!
//! Implemented by `sdhome-broker`; this crate only defines the contract so
//! the automation engine can depend on it without depending on the MQTT
//! client itself (§2's dependency order: Publisher is a leaf, the engine
//! depends on it).

use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

use crate::error::Result;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `topic` with at-least-once delivery. Connects
    /// lazily and idempotently; retries the connection once before raising
    /// an error to the caller (§4.6).
    async fn publish(&self, topic: &str, payload: Json) -> Result<()>;
}

pub type SharedPublisher = Arc<dyn Publisher>;

/// A publisher that records every call instead of touching a broker. Used
/// by engine tests and wherever no broker connection is configured.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: tokio::sync::Mutex<Vec<(String, Json)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Json) -> Result<()> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_publisher_captures_calls() {
        let publisher = RecordingPublisher::default();
        publisher
            .publish("sdhome/lamp1/set", serde_json::json!({"state": "ON"}))
            .await
            .unwrap();
        assert_eq!(publisher.published.lock().await.len(), 1);
    }
}
