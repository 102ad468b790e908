//! The state-sync worker (§4.4): a second, independent subscription that
//! keeps the device registry's cached attributes fresh, separately from the
//! signals pipeline's own ingestion of the same bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value as Json;
use tokio::sync::mpsc;
use uuid::Uuid;

use sdhome_core::broadcaster::DeviceSyncProgress;
use sdhome_core::config::{BrokerConfig, StateSyncConfig};
use sdhome_core::ids::DeviceId;
use sdhome_core::{SharedBroadcaster, SharedClock, SharedPublisher};
use sdhome_storage::Store;

use crate::backoff;

/// What the subscription handler extracts from one inbound `<base>/<id>`
/// message before handing it to the single consumer that owns device
/// persistence. The fixed fields are carried for cheap inspection and
/// logging; the merge itself works off `raw`, the full decoded object.
#[derive(Debug, Clone)]
pub struct DeviceStateQueueItem {
    pub device_id: DeviceId,
    pub linkquality: Option<i64>,
    pub state: Option<String>,
    pub brightness: Option<f64>,
    pub color_temp: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<f64>,
    pub contact: Option<bool>,
    pub occupancy: Option<bool>,
    pub raw: Json,
}

impl DeviceStateQueueItem {
    fn from_raw(device_id: DeviceId, raw: Json) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            device_id,
            linkquality: obj.get("linkquality").and_then(Json::as_i64),
            state: obj.get("state").and_then(Json::as_str).map(str::to_string),
            brightness: obj.get("brightness").and_then(Json::as_f64),
            color_temp: obj.get("color_temp").and_then(Json::as_f64),
            temperature: obj.get("temperature").and_then(Json::as_f64),
            humidity: obj.get("humidity").and_then(Json::as_f64),
            battery: obj.get("battery").and_then(Json::as_f64),
            contact: obj.get("contact").and_then(Json::as_bool),
            occupancy: obj.get("occupancy").and_then(Json::as_bool),
            raw,
        })
    }
}

fn ignored_topic(topic: &str, base_topic: &str) -> bool {
    topic == base_topic
        || topic.ends_with("/availability")
        || topic.ends_with("/get")
        || topic.ends_with("/set")
        || topic.contains("/bridge/")
}

fn device_id_from_topic<'a>(topic: &'a str, base_topic: &str) -> Option<&'a str> {
    let rest = topic.strip_prefix(base_topic)?;
    rest.strip_prefix('/')
}

/// Owns a dedicated broker connection subscribed to `<base>/+`, an unbounded
/// queue feeding a single consumer that serializes device persistence, and
/// (if configured) a periodic poller that asks every known device for its
/// current state.
pub struct StateSyncWorker {
    host: String,
    port: u16,
    base_topic: String,
    wildcard_topic: String,
    poll_interval: Duration,
    client_id: String,
    store: Arc<Store>,
    broadcaster: SharedBroadcaster,
    publisher: SharedPublisher,
    clock: SharedClock,
}

impl StateSyncWorker {
    pub fn new(
        broker: &BrokerConfig,
        state_sync: &StateSyncConfig,
        store: Arc<Store>,
        broadcaster: SharedBroadcaster,
        publisher: SharedPublisher,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            host: broker.host.clone(),
            port: broker.port,
            base_topic: broker.base_topic.clone(),
            wildcard_topic: broker.device_wildcard_topic(),
            poll_interval: Duration::from_secs(state_sync.poll_interval_seconds),
            client_id: format!("sdhome-state-sync-{}", Uuid::new_v4()),
            store,
            broadcaster,
            publisher,
            clock,
        })
    }

    /// Spawns the subscription loop, the single consumer, and (if enabled)
    /// the periodic poller. Returns immediately; the tasks run for the life
    /// of the process.
    pub fn spawn(self: Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn({
            let this = self.clone();
            async move { this.run_subscription(tx).await }
        });
        tokio::spawn({
            let this = self.clone();
            async move { this.drain(rx).await }
        });

        if self.poll_interval > Duration::ZERO {
            tokio::spawn(async move { self.run_polling().await });
        } else {
            tracing::info!("state sync polling disabled (poll interval is 0)");
        }
    }

    async fn run_subscription(&self, tx: mpsc::UnboundedSender<DeviceStateQueueItem>) {
        let mut delay = backoff::INITIAL;
        loop {
            match self.connect_and_subscribe().await {
                Ok(eventloop) => {
                    delay = backoff::INITIAL;
                    self.poll_until_disconnect(eventloop, &tx).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "state sync subscription failed, retrying in {:?}", delay);
                }
            }
            tokio::time::sleep(delay).await;
            delay = backoff::next(delay);
        }
    }

    async fn connect_and_subscribe(&self) -> crate::error::Result<rumqttc::EventLoop> {
        let mut opts = MqttOptions::new(self.client_id.clone(), &self.host, self.port);
        opts.set_clean_session(true);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(opts, 10);
        client.subscribe(&self.wildcard_topic, QoS::AtLeastOnce).await?;
        Ok(eventloop)
    }

    async fn poll_until_disconnect(
        &self,
        mut eventloop: rumqttc::EventLoop,
        tx: &mpsc::UnboundedSender<DeviceStateQueueItem>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_publish(&publish.topic, &publish.payload, tx);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "state sync connection lost");
                    return;
                }
            }
        }
    }

    fn handle_publish(&self, topic: &str, payload: &[u8], tx: &mpsc::UnboundedSender<DeviceStateQueueItem>) {
        if ignored_topic(topic, &self.base_topic) {
            return;
        }
        let Some(device_id) = device_id_from_topic(topic, &self.base_topic) else {
            return;
        };
        let Ok(raw) = serde_json::from_slice::<Json>(payload) else {
            tracing::debug!(topic, "dropped malformed state sync payload");
            return;
        };
        if let Some(item) = DeviceStateQueueItem::from_raw(DeviceId::new(device_id), raw) {
            // The receiver only goes away on shutdown; nothing to act on.
            let _ = tx.send(item);
        }
    }

    /// The single consumer (§4.4, §5): an `mpsc` channel has exactly one
    /// receiver, so draining it here already serializes every device write
    /// without a separate mutex.
    async fn drain(&self, mut rx: mpsc::UnboundedReceiver<DeviceStateQueueItem>) {
        while let Some(item) = rx.recv().await {
            self.process_item(item).await;
        }
    }

    async fn process_item(&self, item: DeviceStateQueueItem) {
        let Some(obj) = item.raw.as_object() else {
            return;
        };
        let incoming: HashMap<String, Json> = obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let existing = match self.store.devices.try_get(&item.device_id) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(device_id = %item.device_id, error = %e, "failed to load device for state sync");
                return;
            }
        };
        let Some(mut device) = existing else {
            tracing::debug!(device_id = %item.device_id, "dropped state sync item for unknown device");
            return;
        };

        let changed = device.merge_attributes(&incoming);
        if changed.is_empty() {
            return;
        }

        if let Some(link_quality) = item.linkquality {
            device.link_quality = Some(link_quality as i32);
        }
        let now = self.clock.now_utc();
        device.last_seen = Some(now);
        device.is_available = true;

        if let Err(e) = self.store.devices.save(&device) {
            tracing::error!(device_id = %item.device_id, error = %e, "failed to persist device state sync");
            return;
        }

        self.broadcaster
            .broadcast_device_sync_progress(&DeviceSyncProgress {
                device_id: item.device_id,
                changed_attributes: changed,
                timestamp: now,
            })
            .await;
    }

    /// Every `poll_interval`, asks each known device for its current state
    /// (§4.4). Publish failures are logged and never stop the worker.
    async fn run_polling(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            let devices = match self.store.devices.list() {
                Ok(devices) => devices,
                Err(e) => {
                    tracing::error!(error = %e, "failed to list devices for state sync poll");
                    continue;
                }
            };
            for device in devices {
                let topic = format!("{}/{}/get", self.base_topic, device.device_id.as_str());
                if let Err(e) = self.publisher.publish(&topic, serde_json::json!({"state": ""})).await {
                    tracing::warn!(device_id = %device.device_id, error = %e, "state sync poll publish failed");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::broadcaster::RecordingBroadcaster;
    use sdhome_core::clock::FixedClock;
    use sdhome_core::model::Device;

    fn worker() -> (Arc<StateSyncWorker>, Arc<RecordingBroadcaster>, tempfile::TempDir) {
        let (store, dir) = Store::open_temp();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let publisher: SharedPublisher = Arc::new(crate::publisher::MqttPublisher::new("localhost", 1883, false));
        let clock: SharedClock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let worker = StateSyncWorker::new(
            &BrokerConfig::default(),
            &StateSyncConfig::default(),
            Arc::new(store),
            broadcaster.clone(),
            publisher,
            clock,
        );
        (worker, broadcaster, dir)
    }

    #[tokio::test]
    async fn drops_item_for_unknown_device() {
        let (worker, broadcaster, _dir) = worker();
        let item = DeviceStateQueueItem::from_raw(
            DeviceId::new("unseen_lamp"),
            serde_json::json!({"state": "ON"}),
        )
        .unwrap();

        worker.process_item(item).await;

        assert!(worker.store.devices.try_get(&DeviceId::new("unseen_lamp")).unwrap().is_none());
        assert!(broadcaster.device_sync_progress.lock().await.is_empty());
    }

    #[tokio::test]
    async fn merges_attributes_into_an_existing_device() {
        let (worker, broadcaster, _dir) = worker();
        let device_id = DeviceId::new("lamp1");
        worker.store.devices.save(&Device::new(device_id.clone(), "Lamp 1")).unwrap();

        let item = DeviceStateQueueItem::from_raw(
            device_id.clone(),
            serde_json::json!({"state": "ON", "brightness": 120}),
        )
        .unwrap();

        worker.process_item(item).await;

        let updated = worker.store.devices.try_get(&device_id).unwrap().unwrap();
        assert!(updated.is_available);
        assert_eq!(broadcaster.device_sync_progress.lock().await.len(), 1);
    }

    #[test]
    fn ignores_availability_get_set_and_bridge_topics() {
        assert!(ignored_topic("sdhome/lamp1/availability", "sdhome"));
        assert!(ignored_topic("sdhome/lamp1/get", "sdhome"));
        assert!(ignored_topic("sdhome/lamp1/set", "sdhome"));
        assert!(ignored_topic("sdhome/bridge/event", "sdhome"));
        assert!(!ignored_topic("sdhome/lamp1", "sdhome"));
    }

    #[test]
    fn extracts_device_id_from_single_level_topic() {
        assert_eq!(device_id_from_topic("sdhome/lamp1", "sdhome"), Some("lamp1"));
        assert_eq!(device_id_from_topic("other/lamp1", "sdhome"), None);
    }

    #[test]
    fn queue_item_captures_fixed_fields_and_raw_payload() {
        let raw = serde_json::json!({"state": "ON", "brightness": 120, "linkquality": 200});
        let item = DeviceStateQueueItem::from_raw(DeviceId::new("lamp1"), raw.clone()).unwrap();
        assert_eq!(item.state.as_deref(), Some("ON"));
        assert_eq!(item.brightness, Some(120.0));
        assert_eq!(item.linkquality, Some(200));
        assert_eq!(item.raw, raw);
    }
}
