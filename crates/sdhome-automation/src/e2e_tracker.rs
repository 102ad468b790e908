//! End-to-end latency tracker (§4.8): correlates an inbound stimulus with
//! the eventual device response it provoked, stage by stage — signal
//! ingestion, automation lookup, action execution, and the target device's
//! echo back on the bus.
//!
//! Timelines in flight are keyed by a random tracking id; timelines waiting
//! on a target device's response are additionally indexed by that device so
//! an inbound state change can resolve the oldest waiter in FIFO order
//! without scanning every in-flight timeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use sdhome_core::ids::DeviceId;
use sdhome_core::model::PipelineSnapshot;
use sdhome_core::broadcaster::{PipelineTimeline, PipelineTimelineStage};
use sdhome_core::SharedBroadcaster;

const TARGET_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const COMPLETED_HISTORY_CAPACITY: usize = 100;

struct InFlight {
    trigger_device_id: DeviceId,
    target_device_id: Option<DeviceId>,
    rule_name: Option<String>,
    stages: Vec<PipelineTimelineStage>,
    action_started: Option<std::time::Instant>,
}

/// Tracks pipeline timelines from inbound stimulus to target-device echo.
pub struct E2eTracker {
    broadcaster: SharedBroadcaster,
    in_flight: DashMap<Uuid, InFlight>,
    waiting_by_device: DashMap<DeviceId, VecDeque<Uuid>>,
    completed: Mutex<VecDeque<PipelineTimeline>>,
}

impl E2eTracker {
    pub fn new(broadcaster: SharedBroadcaster) -> Self {
        Self {
            broadcaster,
            in_flight: DashMap::new(),
            waiting_by_device: DashMap::new(),
            completed: Mutex::new(VecDeque::with_capacity(COMPLETED_HISTORY_CAPACITY)),
        }
    }

    /// `StartTracking`: opens a timeline for a stimulus that is about to be
    /// evaluated by the automation engine, seeded with whatever pipeline
    /// timing (parse/db/broadcast) the ingestion stage already measured.
    pub async fn start_tracking(
        &self,
        trigger_device_id: DeviceId,
        rule_name: Option<String>,
        target_device_id: Option<DeviceId>,
        snapshot: Option<PipelineSnapshot>,
    ) -> Uuid {
        let tracking_id = Uuid::new_v4();
        let mut stages = Vec::new();
        if let Some(snapshot) = snapshot {
            if let Some(ms) = snapshot.parse_ms {
                stages.push(PipelineTimelineStage { name: "Parse".to_string(), duration_ms: ms });
            }
            if let Some(ms) = snapshot.db_ms {
                stages.push(PipelineTimelineStage { name: "Database".to_string(), duration_ms: ms });
            }
            if let Some(ms) = snapshot.broadcast_ms {
                stages.push(PipelineTimelineStage { name: "Broadcast".to_string(), duration_ms: ms });
            }
        }
        self.in_flight.insert(
            tracking_id,
            InFlight {
                trigger_device_id,
                target_device_id,
                rule_name,
                stages,
                action_started: None,
            },
        );
        tracking_id
    }

    /// `RecordAutomationLookup`: how long rule matching took.
    pub async fn record_automation_lookup(&self, tracking_id: Uuid, duration_ms: u64) {
        if let Some(mut entry) = self.in_flight.get_mut(&tracking_id) {
            entry.stages.push(PipelineTimelineStage { name: "RuleLookup".to_string(), duration_ms });
        }
    }

    /// `RecordActionExecution`: action(s) have been dispatched to
    /// `target_device_id`. Starts a 5s watchdog: if the device hasn't echoed
    /// back by then, the timeline is closed out as timed out. Takes `self`
    /// by `Arc` since the watchdog outlives this call.
    pub async fn record_action_execution(self: Arc<Self>, tracking_id: Uuid, duration_ms: u64, target_device_id: DeviceId) {
        {
            let Some(mut entry) = self.in_flight.get_mut(&tracking_id) else {
                return;
            };
            entry.stages.push(PipelineTimelineStage { name: "ActionExecution".to_string(), duration_ms });
            entry.target_device_id = Some(target_device_id.clone());
            entry.action_started = Some(std::time::Instant::now());
        }

        self.waiting_by_device.entry(target_device_id.clone()).or_default().push_back(tracking_id);

        let this = self;
        tokio::spawn(async move {
            tokio::time::sleep(TARGET_RESPONSE_TIMEOUT).await;
            let Some((_, entry)) = this.in_flight.remove(&tracking_id) else {
                return;
            };
            if let Some(mut queue) = this.waiting_by_device.get_mut(&target_device_id) {
                queue.retain(|id| *id != tracking_id);
            }
            let timeline = finish_timeline(tracking_id, entry, true);
            push_completed(&this.completed, timeline.clone(), COMPLETED_HISTORY_CAPACITY);
            this.broadcaster.broadcast_pipeline_timeline(&timeline).await;
        });
    }

    /// Closes a timeline immediately with no response stage expected — used
    /// when a rule executed actions that target no single device (e.g. only
    /// a webhook), so there is nothing to wait for.
    pub async fn complete_without_response(&self, tracking_id: Uuid, duration_ms: u64) {
        let Some((_, mut entry)) = self.in_flight.remove(&tracking_id) else {
            return;
        };
        entry.stages.push(PipelineTimelineStage { name: "ActionExecution".to_string(), duration_ms });
        let timeline = finish_timeline(tracking_id, entry, false);
        push_completed(&self.completed, timeline.clone(), COMPLETED_HISTORY_CAPACITY);
        self.broadcaster.broadcast_pipeline_timeline(&timeline).await;
    }

    /// `RecordTargetDeviceResponse`: an inbound state change from `device_id`
    /// arrived; resolve the oldest timeline waiting on it, if any.
    pub async fn record_target_device_response(&self, device_id: &DeviceId) {
        let tracking_id = {
            let Some(mut queue) = self.waiting_by_device.get_mut(device_id) else {
                return;
            };
            queue.pop_front()
        };
        let Some(tracking_id) = tracking_id else {
            return;
        };
        let Some((_, mut entry)) = self.in_flight.remove(&tracking_id) else {
            return;
        };
        let round_trip_ms = entry
            .action_started
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);
        entry.stages.push(PipelineTimelineStage { name: "TargetDeviceResponse".to_string(), duration_ms: round_trip_ms });
        let timeline = finish_timeline(tracking_id, entry, false);
        push_completed(&self.completed, timeline.clone(), COMPLETED_HISTORY_CAPACITY);
        self.broadcaster.broadcast_pipeline_timeline(&timeline).await;
    }

    /// The most recent completed timelines, newest first, for inspection.
    pub fn recent_timelines(&self) -> Vec<PipelineTimeline> {
        self.completed.lock().expect("completed timelines lock poisoned").iter().cloned().collect()
    }
}

fn finish_timeline(tracking_id: Uuid, entry: InFlight, timed_out: bool) -> PipelineTimeline {
    let total_ms = entry.stages.iter().map(|s| s.duration_ms).sum();
    PipelineTimeline {
        tracking_id,
        trigger_device_id: entry.trigger_device_id,
        target_device_id: entry.target_device_id,
        rule_name: entry.rule_name,
        stages: entry.stages,
        timed_out,
        total_ms,
    }
}

fn push_completed(completed: &Mutex<VecDeque<PipelineTimeline>>, timeline: PipelineTimeline, capacity: usize) {
    let mut completed = completed.lock().expect("completed timelines lock poisoned");
    if completed.len() >= capacity {
        completed.pop_front();
    }
    completed.push_back(timeline);
}
