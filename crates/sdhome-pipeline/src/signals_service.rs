//! Signals Service (§4.2): the per-message pipeline from a raw broker
//! message to a persisted, broadcast `SignalEvent` plus its projections, and
//! the fan-out into the automation engine.

use std::sync::Arc;
use std::time::Instant;

use sdhome_core::model::PipelineSnapshot;
use sdhome_core::{Clock, SharedBroadcaster, SharedClock};
use sdhome_storage::Store;
use serde_json::Value as Json;

use sdhome_automation::engine::AutomationEngine;

use crate::mapper;
use crate::projection;

fn is_scalar(value: &Json) -> bool {
    !value.is_object() && !value.is_array()
}

/// Converts a raw `(topic, payload)` message into durable state and hands it
/// to the projection and automation stages. One instance is shared by the
/// ingestion worker across every inbound message.
pub struct SignalsService {
    store: Arc<Store>,
    broadcaster: SharedBroadcaster,
    engine: Arc<AutomationEngine>,
    clock: SharedClock,
    base_topic: String,
}

impl SignalsService {
    pub fn new(
        store: Arc<Store>,
        broadcaster: SharedBroadcaster,
        engine: Arc<AutomationEngine>,
        clock: SharedClock,
        base_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            engine,
            clock,
            base_topic: base_topic.into(),
        }
    }

    /// Runs the full per-message pipeline (§4.2 steps 1-5). Persistence and
    /// broadcast failures are logged and the signal is dropped (§7); this
    /// never fails the caller, which is the ingestion worker's subscription
    /// loop and must keep running regardless.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let parse_start = Instant::now();
        let now = self.clock.now_utc();
        let Some(signal) = mapper::map(now, topic, &self.base_topic, payload) else {
            tracing::debug!(topic, "dropped message: not a mappable signal");
            return;
        };
        let parse_ms = parse_start.elapsed().as_millis() as u64;

        let db_start = Instant::now();
        if let Err(e) = self.store.signal_events.save(&signal) {
            tracing::error!(topic, error = %e, "failed to persist signal event, dropping");
            return;
        }
        let db_ms = db_start.elapsed().as_millis() as u64;

        let broadcast_start = Instant::now();
        self.broadcaster.broadcast_signal_event(&signal).await;
        let broadcast_ms = broadcast_start.elapsed().as_millis() as u64;

        let snapshot = PipelineSnapshot {
            parse_ms: Some(parse_ms),
            db_ms: Some(db_ms),
            broadcast_ms: Some(broadcast_ms),
        };

        let (readings, trigger_event) = projection::project(&signal);
        for reading in &readings {
            if let Err(e) = self.store.sensor_readings.save(reading) {
                tracing::error!(error = %e, metric = %reading.metric, "failed to persist sensor reading");
                continue;
            }
            self.broadcaster.broadcast_sensor_reading(reading).await;
        }
        if let Some(trigger_event) = &trigger_event {
            if let Err(e) = self.store.trigger_events.save(trigger_event) {
                tracing::error!(error = %e, "failed to persist trigger event");
            } else {
                self.broadcaster.broadcast_trigger_event(trigger_event).await;
            }
        }

        self.detect_device_state_changes(&signal, snapshot).await;

        // Automation evaluation for this event must not delay ingestion of
        // the next one (§4.2 ordering, §5): detach onto background tasks.
        if let Some(trigger_event) = trigger_event {
            let engine = self.engine.clone();
            tokio::spawn(async move {
                engine.process_trigger_event(&trigger_event, Some(snapshot)).await;
            });
        }
        for reading in readings {
            let engine = self.engine.clone();
            tokio::spawn(async move {
                engine.process_sensor_reading(&reading, Some(snapshot)).await;
            });
        }
    }

    /// Diffs the scalar top-level fields of the raw payload against the
    /// engine's cached device state, and invokes
    /// `ProcessDeviceStateChange` for whichever properties actually moved.
    async fn detect_device_state_changes(
        &self,
        signal: &sdhome_core::model::SignalEvent,
        snapshot: PipelineSnapshot,
    ) {
        let Some(obj) = signal.raw_payload.as_object() else {
            return;
        };
        for (property, new_value) in obj {
            if !is_scalar(new_value) {
                continue;
            }
            let old_value = self.engine.cached_device_value(&signal.device_id, property).await;
            let changed = match &old_value {
                Some(old) => old != new_value,
                None => true,
            };
            if !changed {
                continue;
            }
            let engine = self.engine.clone();
            let device_id = signal.device_id.clone();
            let property = property.clone();
            let new_value = new_value.clone();
            tokio::spawn(async move {
                engine
                    .process_device_state_change(&device_id, &property, old_value, new_value, Some(snapshot))
                    .await;
            });
        }
    }
}
