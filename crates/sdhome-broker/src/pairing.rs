//! The pairing sub-protocol (§4.7): turns the bridge's own join/interview
//! chatter and permit-join acknowledgements into a single stream of
//! `DevicePairingProgress` snapshots for the UI layer.
//!
//! `Starting -> Active -> (Interviewing -> DevicePaired)* -> CountdownTick*
//! / Active -> Stopping -> Ended`, with `Failed` reachable from any state.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use sdhome_core::broadcaster::{DevicePairingProgress, DiscoveredDevice, DiscoveredDeviceStatus, PairingStatus};
use sdhome_core::ids::DeviceId;
use sdhome_core::model::Device;
use sdhome_core::{SharedBroadcaster, SharedClock};
use sdhome_storage::Store;

#[derive(Debug, Deserialize)]
struct BridgeEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Json,
}

#[derive(Debug, Deserialize)]
struct PermitJoinResponse {
    value: bool,
    #[serde(default)]
    time: Option<u64>,
}

struct Session {
    id: Uuid,
    status: PairingStatus,
    discovered: Vec<DiscoveredDevice>,
    current_device: Option<String>,
    total_seconds: Option<u64>,
    remaining_seconds: Option<u64>,
}

impl Session {
    fn new(total_seconds: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: PairingStatus::Starting,
            discovered: Vec::new(),
            current_device: None,
            total_seconds,
            remaining_seconds: total_seconds,
        }
    }

    fn discovered_mut(&mut self, ieee_address: &str) -> &mut DiscoveredDevice {
        if let Some(idx) = self.discovered.iter().position(|d| d.ieee_address == ieee_address) {
            &mut self.discovered[idx]
        } else {
            self.discovered.push(DiscoveredDevice {
                ieee_address: ieee_address.to_string(),
                status: DiscoveredDeviceStatus::Pending,
            });
            self.discovered.last_mut().expect("just pushed")
        }
    }
}

/// Drives the pairing state machine from bridge MQTT events. One session is
/// active at a time, matching a bridge's single permit-join mode.
pub struct PairingCoordinator {
    bridge_event_topic: String,
    bridge_permit_join_topic: String,
    broadcaster: SharedBroadcaster,
    clock: SharedClock,
    store: Arc<Store>,
    session: Mutex<Option<Session>>,
}

impl PairingCoordinator {
    pub fn new(
        bridge_event_topic: impl Into<String>,
        bridge_permit_join_topic: impl Into<String>,
        broadcaster: SharedBroadcaster,
        clock: SharedClock,
        store: Arc<Store>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bridge_event_topic: bridge_event_topic.into(),
            bridge_permit_join_topic: bridge_permit_join_topic.into(),
            broadcaster,
            clock,
            store,
            session: Mutex::new(None),
        })
    }

    /// Entry point for the ingestion worker: routes one bridge message by
    /// the exact topic it arrived on. Malformed payloads are logged and
    /// dropped (§7), never torn down the subscription.
    pub async fn handle_bridge_message(self: &Arc<Self>, topic: &str, payload: &[u8]) {
        if topic == self.bridge_permit_join_topic {
            match serde_json::from_slice::<PermitJoinResponse>(payload) {
                Ok(resp) => self.handle_permit_join(resp).await,
                Err(e) => tracing::debug!(error = %e, "dropped malformed permit_join response"),
            }
            return;
        }
        if topic == self.bridge_event_topic {
            match serde_json::from_slice::<BridgeEvent>(payload) {
                Ok(event) => self.handle_event(event).await,
                Err(e) => tracing::debug!(error = %e, "dropped malformed bridge event"),
            }
        }
    }

    async fn handle_permit_join(self: &Arc<Self>, resp: PermitJoinResponse) {
        if resp.value {
            self.start(resp.time).await;
        } else {
            self.stop("permit join disabled").await;
        }
    }

    async fn handle_event(&self, event: BridgeEvent) {
        match event.kind.as_str() {
            "device_joined" => self.handle_joined(&event.data).await,
            "device_interview" => self.handle_interview(&event.data).await,
            "device_announce" => self.handle_announce(&event.data).await,
            other => tracing::debug!(kind = other, "ignored unrecognized bridge event"),
        }
    }

    async fn start(self: &Arc<Self>, time: Option<u64>) {
        {
            let mut guard = self.session.lock().await;
            if guard.is_some() {
                // Already active; a repeated permit_join just refreshes the
                // countdown rather than starting a second session.
                if let Some(session) = guard.as_mut() {
                    session.total_seconds = time;
                    session.remaining_seconds = time;
                }
            } else {
                *guard = Some(Session::new(time));
            }
        }
        self.emit(PairingStatus::Starting, None).await;
        self.emit(PairingStatus::Active, None).await;

        if let Some(seconds) = time {
            if seconds > 0 {
                let this = self.clone();
                tokio::spawn(async move { this.run_countdown(seconds).await });
            }
        }
    }

    async fn run_countdown(self: Arc<Self>, seconds: u64) {
        let mut remaining = seconds;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            remaining = remaining.saturating_sub(1);
            {
                let mut guard = self.session.lock().await;
                match guard.as_mut() {
                    Some(session) => session.remaining_seconds = Some(remaining),
                    None => return, // session already ended by an explicit stop
                }
            }
            if remaining == 0 {
                self.stop("countdown elapsed").await;
                return;
            }
            self.emit(PairingStatus::CountdownTick, None).await;
        }
    }

    async fn stop(self: &Arc<Self>, reason: &str) {
        {
            let guard = self.session.lock().await;
            if guard.is_none() {
                return;
            }
        }
        self.emit(PairingStatus::Stopping, Some(reason.to_string())).await;
        self.emit(PairingStatus::Ended, Some(reason.to_string())).await;
        *self.session.lock().await = None;
    }

    /// Ends the session on an unrecoverable error. Not currently reachable
    /// from any bridge event this worker parses; kept as the escape hatch
    /// the state machine's `Failed` transition describes, for whatever
    /// caller ends up needing it (e.g. a future hard broker failure during
    /// an active pairing session).
    #[allow(dead_code)]
    async fn fail(self: &Arc<Self>, reason: &str) {
        self.emit(PairingStatus::Failed, Some(reason.to_string())).await;
        *self.session.lock().await = None;
    }

    async fn handle_joined(&self, data: &Json) {
        let Some(ieee_address) = data.get("ieee_address").and_then(Json::as_str) else {
            return;
        };
        let friendly_name = data
            .get("friendly_name")
            .and_then(Json::as_str)
            .unwrap_or(ieee_address);

        {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else { return };
            session.discovered_mut(ieee_address);
            session.current_device = Some(ieee_address.to_string());
        }

        match self.store.devices.try_get(&DeviceId::new(ieee_address)) {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Devices are created on first sight, sync or pairing (§3).
                let device = Device::new(DeviceId::new(ieee_address), friendly_name);
                if let Err(e) = self.store.devices.save(&device) {
                    tracing::error!(error = %e, ieee_address, "failed to create joined device");
                }
            }
            Err(e) => tracing::error!(error = %e, ieee_address, "failed to look up joined device"),
        }

        self.emit(PairingStatus::Active, None).await;
    }

    async fn handle_interview(&self, data: &Json) {
        let Some(ieee_address) = data.get("ieee_address").and_then(Json::as_str) else {
            return;
        };
        let status = data.get("status").and_then(Json::as_str).unwrap_or("");

        let next_status = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else { return };
            session.current_device = Some(ieee_address.to_string());
            match status {
                "started" => {
                    session.discovered_mut(ieee_address).status = DiscoveredDeviceStatus::Interviewing;
                    PairingStatus::Interviewing
                }
                "successful" => {
                    session.discovered_mut(ieee_address).status = DiscoveredDeviceStatus::Ready;
                    PairingStatus::DevicePaired
                }
                "failed" => {
                    session.discovered_mut(ieee_address).status = DiscoveredDeviceStatus::Failed;
                    PairingStatus::Active
                }
                _ => return,
            }
        };
        self.emit(next_status, None).await;
        if next_status == PairingStatus::DevicePaired {
            self.emit(PairingStatus::Active, None).await;
        }
    }

    async fn handle_announce(&self, data: &Json) {
        let ieee_address = data.get("ieee_address").and_then(Json::as_str);
        {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else { return };
            session.current_device = ieee_address.map(str::to_string);
        }
        self.emit(PairingStatus::Active, None).await;
    }

    async fn emit(&self, status: PairingStatus, message: Option<String>) {
        let guard = self.session.lock().await;
        let Some(session) = guard.as_ref() else { return };
        let progress = DevicePairingProgress {
            pairing_id: session.id,
            status,
            message,
            remaining_seconds: session.remaining_seconds,
            total_seconds: session.total_seconds,
            current_device: session.current_device.clone(),
            discovered_devices: session.discovered.clone(),
            timestamp: self.clock.now_utc(),
        };
        drop(guard);
        self.broadcaster.broadcast_device_pairing_progress(&progress).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::clock::FixedClock;
    use sdhome_core::broadcaster::RecordingBroadcaster;

    fn coordinator() -> (Arc<PairingCoordinator>, Arc<RecordingBroadcaster>, tempfile::TempDir) {
        let (store, dir) = sdhome_storage::Store::open_temp();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let clock: SharedClock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let coordinator = PairingCoordinator::new(
            "sdhome/bridge/event",
            "sdhome/bridge/response/permit_join",
            broadcaster.clone(),
            clock,
            Arc::new(store),
        );
        (coordinator, broadcaster, dir)
    }

    #[tokio::test]
    async fn permit_join_true_starts_then_active() {
        let (coordinator, broadcaster, _dir) = coordinator();
        coordinator
            .handle_bridge_message(
                "sdhome/bridge/response/permit_join",
                br#"{"value": true, "time": 0}"#,
            )
            .await;
        let recorded = broadcaster.pairing_progress.lock().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].status, PairingStatus::Starting);
        assert_eq!(recorded[1].status, PairingStatus::Active);
    }

    #[tokio::test]
    async fn permit_join_false_without_active_session_is_a_noop() {
        let (coordinator, broadcaster, _unused) = coordinator();
        coordinator
            .handle_bridge_message(
                "sdhome/bridge/response/permit_join",
                br#"{"value": false}"#,
            )
            .await;
        assert!(broadcaster.pairing_progress.lock().await.is_empty());
    }

    #[tokio::test]
    async fn interview_lifecycle_marks_device_ready() {
        let (coordinator, broadcaster, _unused) = coordinator();
        coordinator
            .handle_bridge_message("sdhome/bridge/response/permit_join", br#"{"value": true, "time": 0}"#)
            .await;
        coordinator
            .handle_bridge_message(
                "sdhome/bridge/event",
                br#"{"type": "device_interview", "data": {"ieee_address": "0x1", "status": "started"}}"#,
            )
            .await;
        coordinator
            .handle_bridge_message(
                "sdhome/bridge/event",
                br#"{"type": "device_interview", "data": {"ieee_address": "0x1", "status": "successful"}}"#,
            )
            .await;
        let recorded = broadcaster.pairing_progress.lock().await;
        let last = recorded.last().unwrap();
        assert_eq!(last.discovered_devices.len(), 1);
        assert_eq!(last.discovered_devices[0].status, DiscoveredDeviceStatus::Ready);
    }
}
