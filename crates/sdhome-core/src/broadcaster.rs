//! The broadcaster port (§6) and the payload shapes it pushes.
//!
//! Implemented elsewhere (the UI/API layer); this crate only defines the
//! contract. Every method is fire-and-forget: implementations must swallow
//! and log their own failures rather than propagate them, since the
//! automation engine, projection service, and ingestion worker all call the
//! broadcaster and none of them may block or fail on its behalf (§9's
//! reentrancy/cycle-hazard note — the broadcaster must never call back into
//! the engine).

use crate::ids::{DeviceId, RuleId};
use crate::model::{SensorReading, SignalEvent, TriggerEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogPhase {
    TriggerMatched,
    TriggerSkipped,
    CooldownActive,
    ConditionEvaluating,
    ConditionPassed,
    ConditionFailed,
    ActionExecuting,
    ActionCompleted,
    ActionFailed,
    ExecutionCompleted,
    ExecutionFailed,
}

/// A single structured live-log entry emitted during rule evaluation (§4.5.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub phase: LogPhase,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<HashMap<String, Json>>,
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    pub device_id: DeviceId,
    pub property: String,
    pub old_value: Option<Json>,
    pub new_value: Json,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTimelineStage {
    pub name: String,
    pub duration_ms: u64,
}

/// A completed (or timed-out) end-to-end timeline, ready for the UI (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTimeline {
    pub tracking_id: uuid::Uuid,
    pub trigger_device_id: DeviceId,
    pub target_device_id: Option<DeviceId>,
    pub rule_name: Option<String>,
    pub stages: Vec<PipelineTimelineStage>,
    pub timed_out: bool,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSyncProgress {
    pub device_id: DeviceId,
    pub changed_attributes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingStatus {
    Starting,
    Active,
    Interviewing,
    DevicePaired,
    CountdownTick,
    Stopping,
    Ended,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveredDeviceStatus {
    Pending,
    Interviewing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ieee_address: String,
    pub status: DiscoveredDeviceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePairingProgress {
    pub pairing_id: uuid::Uuid,
    pub status: PairingStatus,
    pub message: Option<String>,
    pub remaining_seconds: Option<u64>,
    pub total_seconds: Option<u64>,
    pub current_device: Option<String>,
    pub discovered_devices: Vec<DiscoveredDevice>,
    pub timestamp: DateTime<Utc>,
}

/// One-way push to the UI layer. Never call back into any engine from an
/// implementation of this trait.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_signal_event(&self, event: &SignalEvent);
    async fn broadcast_sensor_reading(&self, reading: &SensorReading);
    async fn broadcast_trigger_event(&self, event: &TriggerEvent);
    async fn broadcast_device_state_update(&self, update: &DeviceStateUpdate);
    async fn broadcast_automation_log(&self, entry: &AutomationLogEntry);
    async fn broadcast_pipeline_timeline(&self, timeline: &PipelineTimeline);
    async fn broadcast_device_sync_progress(&self, progress: &DeviceSyncProgress);
    async fn broadcast_device_pairing_progress(&self, progress: &DevicePairingProgress);
}

pub type SharedBroadcaster = Arc<dyn Broadcaster>;

/// A broadcaster that drops everything. Used where no UI layer is attached
/// (tests, headless operation) — still a valid implementation of the
/// fire-and-forget contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBroadcaster;

#[async_trait]
impl Broadcaster for NoOpBroadcaster {
    async fn broadcast_signal_event(&self, _event: &SignalEvent) {}
    async fn broadcast_sensor_reading(&self, _reading: &SensorReading) {}
    async fn broadcast_trigger_event(&self, _event: &TriggerEvent) {}
    async fn broadcast_device_state_update(&self, _update: &DeviceStateUpdate) {}
    async fn broadcast_automation_log(&self, _entry: &AutomationLogEntry) {}
    async fn broadcast_pipeline_timeline(&self, _timeline: &PipelineTimeline) {}
    async fn broadcast_device_sync_progress(&self, _progress: &DeviceSyncProgress) {}
    async fn broadcast_device_pairing_progress(&self, _progress: &DevicePairingProgress) {}
}

/// A broadcaster that records everything it receives, for assertions in
/// tests of the components that call it (mirrors the reference platform's
/// in-memory test doubles for its message channels).
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub automation_logs: tokio::sync::Mutex<Vec<AutomationLogEntry>>,
    pub pipeline_timelines: tokio::sync::Mutex<Vec<PipelineTimeline>>,
    pub pairing_progress: tokio::sync::Mutex<Vec<DevicePairingProgress>>,
    pub device_sync_progress: tokio::sync::Mutex<Vec<DeviceSyncProgress>>,
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast_signal_event(&self, _event: &SignalEvent) {}
    async fn broadcast_sensor_reading(&self, _reading: &SensorReading) {}
    async fn broadcast_trigger_event(&self, _event: &TriggerEvent) {}
    async fn broadcast_device_state_update(&self, _update: &DeviceStateUpdate) {}

    async fn broadcast_automation_log(&self, entry: &AutomationLogEntry) {
        self.automation_logs.lock().await.push(entry.clone());
    }

    async fn broadcast_pipeline_timeline(&self, timeline: &PipelineTimeline) {
        self.pipeline_timelines.lock().await.push(timeline.clone());
    }

    async fn broadcast_device_sync_progress(&self, progress: &DeviceSyncProgress) {
        self.device_sync_progress.lock().await.push(progress.clone());
    }

    async fn broadcast_device_pairing_progress(&self, progress: &DevicePairingProgress) {
        self.pairing_progress.lock().await.push(progress.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SignalEventId;
    use crate::model::{DeviceKind, EventCategory};

    fn sample_signal_event() -> SignalEvent {
        SignalEvent::new(
            Utc::now(),
            "mqtt",
            DeviceId::new("x"),
            "motion",
            "motion",
            None,
            None,
            "sdhome/x",
            serde_json::json!({"occupancy": true}),
            DeviceKind::Motion,
            EventCategory::Telemetry,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn recording_broadcaster_captures_automation_logs() {
        let broadcaster = RecordingBroadcaster::default();
        let entry = AutomationLogEntry {
            rule_id: RuleId::new(),
            rule_name: "test".into(),
            phase: LogPhase::TriggerMatched,
            level: LogLevel::Info,
            message: "matched".into(),
            details: None,
            duration_ms: None,
            timestamp: Utc::now(),
        };
        broadcaster.broadcast_automation_log(&entry).await;
        assert_eq!(broadcaster.automation_logs.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn noop_broadcaster_accepts_everything() {
        let broadcaster = NoOpBroadcaster;
        broadcaster.broadcast_signal_event(&sample_signal_event()).await;
        let _id = SignalEventId::new();
    }
}
