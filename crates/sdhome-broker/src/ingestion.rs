//! The ingestion worker (§4.1): one persistent subscription to the broker
//! that routes every inbound message to either the pairing sub-protocol or
//! the signals pipeline, in the order the broker delivered it.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use uuid::Uuid;

use sdhome_core::config::BrokerConfig;
use sdhome_pipeline::SignalsService;

use crate::backoff;
use crate::error::Result;
use crate::pairing::PairingCoordinator;

/// Subscribes to the configured topic filter and, for each message, routes
/// bridge events to the pairing coordinator and everything else to the
/// signals pipeline. Messages are dispatched one at a time from the single
/// poll loop below, so per-device ordering is whatever the broker delivered
/// (§4.1, §5) — nothing here fans a connection's messages out concurrently.
pub struct IngestionWorker {
    host: String,
    port: u16,
    enabled: bool,
    topic_filter: String,
    bridge_event_topic: String,
    bridge_permit_join_topic: String,
    client_id: String,
    signals: Arc<SignalsService>,
    pairing: Arc<PairingCoordinator>,
}

impl IngestionWorker {
    pub fn new(config: &BrokerConfig, signals: Arc<SignalsService>, pairing: Arc<PairingCoordinator>) -> Arc<Self> {
        Arc::new(Self {
            host: config.host.clone(),
            port: config.port,
            enabled: config.enabled,
            topic_filter: config.topic_filter.clone(),
            bridge_event_topic: config.bridge_event_topic(),
            bridge_permit_join_topic: config.bridge_permit_join_response_topic(),
            // Kept stable across reconnects within this process (§4.1:
            // "unique per process lifetime") so the broker doesn't see a
            // stream of distinct clients fighting over the same session.
            client_id: format!("sdhome-ingestion-{}", Uuid::new_v4()),
            signals,
            pairing,
        })
    }

    /// Runs until the process shuts down. If the broker is disabled, logs
    /// once and returns immediately (§4.1: "a disabled flag causes the
    /// worker to idle"). Otherwise reconnects with bounded backoff,
    /// starting at ~5s, forever.
    pub async fn run(self: Arc<Self>) {
        if !self.enabled {
            tracing::info!("ingestion worker disabled, idling");
            return;
        }

        let mut delay = backoff::INITIAL;
        loop {
            match self.connect_and_subscribe().await {
                Ok(eventloop) => {
                    delay = backoff::INITIAL;
                    self.poll_until_disconnect(eventloop).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ingestion worker failed to connect, retrying in {:?}", delay);
                }
            }
            tokio::time::sleep(delay).await;
            delay = backoff::next(delay);
        }
    }

    async fn connect_and_subscribe(&self) -> Result<rumqttc::EventLoop> {
        let mut opts = MqttOptions::new(self.client_id.clone(), &self.host, self.port);
        opts.set_clean_session(true);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(opts, 10);
        client.subscribe(&self.topic_filter, QoS::AtLeastOnce).await?;
        Ok(eventloop)
    }

    async fn poll_until_disconnect(&self, mut eventloop: rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "ingestion worker connection lost");
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        if topic == self.bridge_event_topic || topic == self.bridge_permit_join_topic {
            self.pairing.handle_bridge_message(topic, payload).await;
        } else {
            self.signals.handle_message(topic, payload).await;
        }
    }
}
