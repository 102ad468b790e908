//! The Automation Engine (§4.5): matches rules against device-state changes,
//! trigger events, sensor readings, and a time tick; evaluates conditions;
//! executes actions; enforces cooldown; emits structured live logs; and
//! drives the end-to-end latency tracker.
//!
//! State it owns — an in-memory device-state cache and a sensor-reading
//! cache — is guarded by a single lock (§4.5, §9); every critical section
//! below is a plain map read/write with no `.await` inside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde_json::Value as Json;

use sdhome_core::config::LocationConfig;
use sdhome_core::ids::{DeviceId, ExecutionLogId};
use sdhome_core::model::{
    Action, ActionResult, ActionType, AutomationRule, Condition, ConditionMode, ConditionType,
    ExecutionLog, ExecutionStatus, PipelineSnapshot, SensorReading, SunEvent, Trigger, TriggerEvent,
    TriggerMode, TriggerType,
};
use sdhome_core::value::{Operator, Value, NUMERIC_TOLERANCE};
use sdhome_core::{
    broadcaster::{AutomationLogEntry, DeviceStateUpdate, LogLevel, LogPhase},
    Clock, SharedBroadcaster, SharedClock, SharedPublisher,
};
use sdhome_storage::Store;

use crate::e2e_tracker::E2eTracker;

struct EngineCache {
    device_state: HashMap<DeviceId, HashMap<String, Json>>,
    sensor_readings: HashMap<DeviceId, HashMap<String, f64>>,
}

/// Evaluates and executes `AutomationRule`s against the three stimulus kinds
/// plus a time tick. One instance is shared across the pipeline and the
/// app's tick-loop task.
pub struct AutomationEngine {
    store: Arc<Store>,
    publisher: SharedPublisher,
    broadcaster: SharedBroadcaster,
    clock: SharedClock,
    tracker: Arc<E2eTracker>,
    location: Option<LocationConfig>,
    base_topic: String,
    http: reqwest::Client,
    cache: Mutex<EngineCache>,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<Store>,
        publisher: SharedPublisher,
        broadcaster: SharedBroadcaster,
        clock: SharedClock,
        tracker: Arc<E2eTracker>,
        location: Option<LocationConfig>,
        base_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            broadcaster,
            clock,
            tracker,
            location,
            base_topic: base_topic.into(),
            http: reqwest::Client::new(),
            cache: Mutex::new(EngineCache {
                device_state: HashMap::new(),
                sensor_readings: HashMap::new(),
            }),
        }
    }

    /// Seeds the caches from persisted state on startup: device attributes
    /// for the state cache, and recent sensor readings (look-back ~24h) for
    /// the reading cache (§4.5).
    pub fn warm_caches(&self) -> sdhome_storage::Result<()> {
        let lookback = self.clock.now_utc() - chrono::Duration::hours(24);
        for device in self.store.devices.list()? {
            {
                let mut cache = self.cache.lock().expect("engine cache poisoned");
                cache
                    .device_state
                    .entry(device.device_id.clone())
                    .or_default()
                    .extend(device.attributes.clone());
            }
            for reading in self.store.sensor_readings.list_by_device(&device.device_id, 500)? {
                if reading.timestamp >= lookback {
                    self.set_cached_reading(&device.device_id, &reading.metric, reading.value);
                }
            }
        }
        Ok(())
    }

    /// Spawns the ≈30s time-tick task (§4.5.1). Returns the join handle so
    /// the composition root can track/cancel it on shutdown.
    pub fn spawn_time_tick_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                self.process_time_tick().await;
            }
        })
    }

    pub async fn cached_device_value(&self, device_id: &DeviceId, property: &str) -> Option<Json> {
        let cache = self.cache.lock().expect("engine cache poisoned");
        cache.device_state.get(device_id).and_then(|m| m.get(property)).cloned()
    }

    fn set_cached_device_value(&self, device_id: &DeviceId, property: &str, value: Json) {
        let mut cache = self.cache.lock().expect("engine cache poisoned");
        cache
            .device_state
            .entry(device_id.clone())
            .or_default()
            .insert(property.to_string(), value);
    }

    fn cached_reading(&self, device_id: &DeviceId, metric: &str) -> Option<f64> {
        let cache = self.cache.lock().expect("engine cache poisoned");
        cache.sensor_readings.get(device_id).and_then(|m| m.get(metric)).copied()
    }

    fn set_cached_reading(&self, device_id: &DeviceId, metric: &str, value: f64) {
        let mut cache = self.cache.lock().expect("engine cache poisoned");
        cache
            .sensor_readings
            .entry(device_id.clone())
            .or_default()
            .insert(metric.to_string(), value);
    }

    async fn emit_log(
        &self,
        rule: &AutomationRule,
        phase: LogPhase,
        level: LogLevel,
        message: impl Into<String>,
        duration_ms: Option<u64>,
    ) {
        let message = message.into();
        let entry = AutomationLogEntry {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            phase,
            level,
            message: message.clone(),
            details: None,
            duration_ms,
            timestamp: self.clock.now_utc(),
        };
        tracing::debug!(rule = %rule.name, phase = ?phase, "{message}");
        self.broadcaster.broadcast_automation_log(&entry).await;
    }

    fn rules_for_stimulus(&self) -> Vec<AutomationRule> {
        match self.store.rules.list() {
            Ok(rules) => rules.into_iter().filter(|r| r.can_fire_automatically()).collect(),
            Err(e) => {
                tracing::error!(error = %e, "failed to load automation rules");
                Vec::new()
            }
        }
    }

    /// `ProcessDeviceStateChange` (§4.5.1). Also resolves any E2E timeline
    /// waiting on this device's echo, since a target device's confirmation
    /// arrives as an ordinary inbound state change.
    pub async fn process_device_state_change(
        &self,
        device_id: &DeviceId,
        property: &str,
        old_value: Option<Json>,
        new_value: Json,
        snapshot: Option<PipelineSnapshot>,
    ) {
        let lookup_start = Instant::now();
        self.set_cached_device_value(device_id, property, new_value.clone());

        let update = DeviceStateUpdate {
            device_id: device_id.clone(),
            property: property.to_string(),
            old_value: old_value.clone(),
            new_value: new_value.clone(),
            timestamp: self.clock.now_utc(),
        };
        self.broadcaster.broadcast_device_state_update(&update).await;
        self.tracker.record_target_device_response(device_id).await;

        let old = old_value.map(Value::from_json);
        let new = Value::from_json(new_value);

        for rule in self.rules_for_stimulus() {
            let matching: Vec<&Trigger> = rule
                .triggers
                .iter()
                .filter(|t| {
                    t.trigger_type == TriggerType::DeviceState
                        && t.device_id.as_ref() == Some(device_id)
                        && (t.property.is_none() || t.property.as_deref() == Some(property))
                })
                .collect();
            if matching.is_empty() {
                continue;
            }
            let holds = |t: &Trigger| -> bool {
                let op = t.operator.unwrap_or(Operator::AnyChange);
                let target = t.value.as_ref().map(|v| Value::from_json(v.clone()));
                op.evaluate(old.as_ref(), &new, target.as_ref(), None)
            };
            let fires = match rule.trigger_mode {
                TriggerMode::Any => matching.iter().any(|t| holds(t)),
                TriggerMode::All => matching.iter().all(|t| holds(t)),
            };
            if !fires {
                continue;
            }
            let lookup_ms = lookup_start.elapsed().as_millis() as u64;
            let trigger_source = serde_json::json!({
                "kind": "device_state",
                "deviceId": device_id.as_str(),
                "property": property,
            });
            self.evaluate_and_execute(rule, trigger_source, snapshot, lookup_ms, Some(device_id.clone()))
                .await;
        }
    }

    /// `ProcessTriggerEvent` (§4.5.1, §4.5.2).
    pub async fn process_trigger_event(&self, event: &TriggerEvent, snapshot: Option<PipelineSnapshot>) {
        let lookup_start = Instant::now();
        for rule in self.rules_for_stimulus() {
            let matching: Vec<&Trigger> = rule
                .triggers
                .iter()
                .filter(|t| {
                    t.trigger_type == TriggerType::TriggerEvent
                        && t.device_id.as_ref() == Some(&event.device_id)
                        && (t.property.is_none() || t.property.as_deref() == Some(event.trigger_type.as_str()))
                })
                .collect();
            if matching.is_empty() {
                continue;
            }
            let holds = |t: &Trigger| -> bool {
                match &t.value {
                    None => true,
                    Some(v) => match (v.as_str(), &event.trigger_sub_type) {
                        (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
                        _ => false,
                    },
                }
            };
            let fires = match rule.trigger_mode {
                TriggerMode::Any => matching.iter().any(|t| holds(t)),
                TriggerMode::All => matching.iter().all(|t| holds(t)),
            };
            if !fires {
                continue;
            }
            let lookup_ms = lookup_start.elapsed().as_millis() as u64;
            let trigger_source = serde_json::json!({
                "kind": "trigger_event",
                "deviceId": event.device_id.as_str(),
                "triggerType": event.trigger_type,
                "triggerSubType": event.trigger_sub_type,
            });
            self.evaluate_and_execute(rule, trigger_source, snapshot, lookup_ms, Some(event.device_id.clone()))
                .await;
        }
    }

    /// `ProcessSensorReading` (§4.5.1, §4.5.2).
    pub async fn process_sensor_reading(&self, reading: &SensorReading, snapshot: Option<PipelineSnapshot>) {
        let lookup_start = Instant::now();
        let old = self.cached_reading(&reading.device_id, &reading.metric);
        self.set_cached_reading(&reading.device_id, &reading.metric, reading.value);

        for rule in self.rules_for_stimulus() {
            let matching: Vec<&Trigger> = rule
                .triggers
                .iter()
                .filter(|t| {
                    t.trigger_type == TriggerType::SensorReading
                        && t.device_id.as_ref() == Some(&reading.device_id)
                        && (t.property.is_none() || t.property.as_deref() == Some(reading.metric.as_str()))
                })
                .collect();
            if matching.is_empty() {
                continue;
            }
            let holds = |t: &Trigger| -> bool {
                let op = t.operator.unwrap_or(Operator::AnyChange);
                match op {
                    Operator::AnyChange => match old {
                        Some(o) => (reading.value - o).abs() > NUMERIC_TOLERANCE,
                        None => false,
                    },
                    Operator::ChangesTo => {
                        let Some(target) = t.value.as_ref().and_then(Json::as_f64) else {
                            return false;
                        };
                        let new_matches = (reading.value - target).abs() <= NUMERIC_TOLERANCE;
                        let old_not_matches = old.map(|o| (o - target).abs() > NUMERIC_TOLERANCE).unwrap_or(true);
                        new_matches && old_not_matches
                    }
                    _ => {
                        let new_v = Value::Number(reading.value);
                        let old_v = old.map(Value::Number);
                        let target = t.value.as_ref().map(|v| Value::from_json(v.clone()));
                        op.evaluate(old_v.as_ref(), &new_v, target.as_ref(), None)
                    }
                }
            };
            let fires = match rule.trigger_mode {
                TriggerMode::Any => matching.iter().any(|t| holds(t)),
                TriggerMode::All => matching.iter().all(|t| holds(t)),
            };
            if !fires {
                continue;
            }
            let lookup_ms = lookup_start.elapsed().as_millis() as u64;
            let trigger_source = serde_json::json!({
                "kind": "sensor_reading",
                "deviceId": reading.device_id.as_str(),
                "metric": reading.metric,
                "value": reading.value,
            });
            self.evaluate_and_execute(rule, trigger_source, snapshot, lookup_ms, Some(reading.device_id.clone()))
                .await;
        }
    }

    /// Internal ≈30s tick: matches `Time`/`Sunrise`/`Sunset` triggers (§4.5.1).
    pub async fn process_time_tick(&self) {
        let lookup_start = Instant::now();
        let now_local = self.clock.now_local();
        for rule in self.rules_for_stimulus() {
            let time_triggers: Vec<&Trigger> = rule
                .triggers
                .iter()
                .filter(|t| matches!(t.trigger_type, TriggerType::Time | TriggerType::Sunrise | TriggerType::Sunset))
                .collect();
            if time_triggers.is_empty() {
                continue;
            }
            let holds = |t: &Trigger| -> bool {
                match t.trigger_type {
                    TriggerType::Time => self.time_expression_matches(t.time_expression.as_deref(), now_local),
                    TriggerType::Sunrise => self.sun_event_matches(SunEvent::Sunrise, t.offset_minutes, now_local),
                    TriggerType::Sunset => self.sun_event_matches(SunEvent::Sunset, t.offset_minutes, now_local),
                    _ => false,
                }
            };
            let fires = match rule.trigger_mode {
                TriggerMode::Any => time_triggers.iter().any(|t| holds(t)),
                TriggerMode::All => time_triggers.iter().all(|t| holds(t)),
            };
            if !fires {
                continue;
            }
            let lookup_ms = lookup_start.elapsed().as_millis() as u64;
            let trigger_source = serde_json::json!({"kind": "time_tick"});
            self.evaluate_and_execute(rule, trigger_source, None, lookup_ms, None).await;
        }
    }

    fn time_expression_matches(&self, expr: Option<&str>, now_local: DateTime<Local>) -> bool {
        let Some(expr) = expr else { return false };
        let Some((hour, minute)) = parse_hhmm(expr) else {
            return false;
        };
        let target_minutes = (hour * 60 + minute) as i64;
        let now_minutes = (now_local.hour() * 60 + now_local.minute()) as i64;
        (now_minutes - target_minutes).abs() == 0
    }

    fn sun_event_matches(&self, event: SunEvent, offset_minutes: i32, now_local: DateTime<Local>) -> bool {
        let Some(location) = self.location else {
            return false;
        };
        let date = now_local.date_naive();
        let (sunrise_ts, sunset_ts) =
            sunrise::sunrise_sunset(location.latitude, location.longitude, date.year(), date.month(), date.day());
        let epoch = match event {
            SunEvent::Sunrise => sunrise_ts,
            SunEvent::Sunset => sunset_ts,
        };
        let Some(at_utc) = DateTime::<Utc>::from_timestamp(epoch, 0) else {
            return false;
        };
        let target = at_utc.with_timezone(&Local) + chrono::Duration::minutes(offset_minutes as i64);
        (now_local - target).num_seconds().abs() <= 30
    }

    /// Cooldown gate, condition evaluation, action execution and logging
    /// (§4.5.3-4.5.6) for a rule whose trigger set has already matched.
    async fn evaluate_and_execute(
        &self,
        mut rule: AutomationRule,
        trigger_source: Json,
        snapshot: Option<PipelineSnapshot>,
        lookup_ms: u64,
        trigger_device_id: Option<DeviceId>,
    ) {
        let now = self.clock.now_utc();
        self.emit_log(
            &rule,
            LogPhase::TriggerMatched,
            LogLevel::Info,
            format!("rule '{}' matched", rule.name),
            None,
        )
        .await;

        if rule.is_in_cooldown(now) {
            self.emit_log(
                &rule,
                LogPhase::CooldownActive,
                LogLevel::Info,
                format!("rule '{}' is in cooldown, skipping", rule.name),
                None,
            )
            .await;
            let log = ExecutionLog {
                id: ExecutionLogId::new(),
                rule_id: rule.id,
                executed_at: now,
                status: ExecutionStatus::SkippedCooldown,
                trigger_source,
                action_results: Vec::new(),
                duration_ms: 0,
                error_message: None,
            };
            if let Err(e) = self.store.rules.append_execution_log(&log) {
                tracing::error!(error = %e, "failed to persist SkippedCooldown execution log");
            }
            return;
        }

        self.emit_log(&rule, LogPhase::ConditionEvaluating, LogLevel::Debug, "evaluating conditions", None)
            .await;
        let now_local = self.clock.now_local();
        let conditions_hold = self.evaluate_conditions(&rule, now_local);
        if !conditions_hold {
            self.emit_log(
                &rule,
                LogPhase::ConditionFailed,
                LogLevel::Info,
                format!("rule '{}' conditions not met", rule.name),
                None,
            )
            .await;
            let log = ExecutionLog {
                id: ExecutionLogId::new(),
                rule_id: rule.id,
                executed_at: now,
                status: ExecutionStatus::SkippedCondition,
                trigger_source,
                action_results: Vec::new(),
                duration_ms: 0,
                error_message: None,
            };
            if let Err(e) = self.store.rules.append_execution_log(&log) {
                tracing::error!(error = %e, "failed to persist SkippedCondition execution log");
            }
            return;
        }
        self.emit_log(&rule, LogPhase::ConditionPassed, LogLevel::Debug, "conditions satisfied", None)
            .await;

        let tracking_id = self
            .tracker
            .start_tracking(
                trigger_device_id.unwrap_or_else(|| DeviceId::new("unknown")),
                Some(rule.name.clone()),
                None,
                snapshot,
            )
            .await;
        self.tracker.record_automation_lookup(tracking_id, lookup_ms).await;

        let action_start = Instant::now();
        let mut action_results = Vec::with_capacity(rule.actions.len());
        let mut target_device: Option<DeviceId> = None;

        for action in rule.sorted_actions() {
            self.emit_log(
                &rule,
                LogPhase::ActionExecuting,
                LogLevel::Debug,
                format!("executing {:?}", action.action_type),
                None,
            )
            .await;
            let a_start = Instant::now();
            let outcome = self.execute_action(action).await;
            let duration_ms = a_start.elapsed().as_millis() as u64;

            if target_device.is_none() {
                target_device = action_target_device(action);
            }

            match &outcome {
                Ok(()) => {
                    self.emit_log(
                        &rule,
                        LogPhase::ActionCompleted,
                        LogLevel::Success,
                        format!("{:?} completed", action.action_type),
                        Some(duration_ms),
                    )
                    .await
                }
                Err(e) => {
                    self.emit_log(
                        &rule,
                        LogPhase::ActionFailed,
                        LogLevel::Error,
                        format!("{:?} failed: {e}", action.action_type),
                        Some(duration_ms),
                    )
                    .await
                }
            }

            action_results.push(ActionResult {
                action_id: action.id,
                success: outcome.is_ok(),
                error: outcome.err(),
                duration_ms,
            });
        }
        let action_total_ms = action_start.elapsed().as_millis() as u64;

        match &target_device {
            Some(device_id) => {
                self.tracker
                    .clone()
                    .record_action_execution(tracking_id, action_total_ms, device_id.clone())
                    .await
            }
            None => self.tracker.complete_without_response(tracking_id, action_total_ms).await,
        }

        let status = ExecutionLog::status_from_action_results(&action_results);
        rule.execution_count += 1;
        rule.last_triggered_at = Some(now);
        if let Err(e) = self.store.rules.save(&rule) {
            tracing::error!(error = %e, "failed to persist rule after execution");
        }

        let error_message = matches!(status, ExecutionStatus::Failure | ExecutionStatus::PartialFailure)
            .then(|| action_results.iter().filter_map(|r| r.error.clone()).collect::<Vec<_>>().join("; "));

        let log = ExecutionLog {
            id: ExecutionLogId::new(),
            rule_id: rule.id,
            executed_at: now,
            status,
            trigger_source,
            action_results,
            duration_ms: action_total_ms,
            error_message,
        };
        if let Err(e) = self.store.rules.append_execution_log(&log) {
            tracing::error!(error = %e, "failed to persist execution log");
        }

        match status {
            ExecutionStatus::Success => {
                self.emit_log(
                    &rule,
                    LogPhase::ExecutionCompleted,
                    LogLevel::Success,
                    format!("rule '{}' executed successfully", rule.name),
                    Some(action_total_ms),
                )
                .await
            }
            ExecutionStatus::PartialFailure => {
                self.emit_log(
                    &rule,
                    LogPhase::ExecutionCompleted,
                    LogLevel::Warning,
                    format!("rule '{}' partially failed", rule.name),
                    Some(action_total_ms),
                )
                .await
            }
            _ => {
                self.emit_log(
                    &rule,
                    LogPhase::ExecutionFailed,
                    LogLevel::Error,
                    format!("rule '{}' failed", rule.name),
                    Some(action_total_ms),
                )
                .await
            }
        }
    }

    fn evaluate_conditions(&self, rule: &AutomationRule, now_local: DateTime<Local>) -> bool {
        if rule.conditions.is_empty() {
            return true;
        }
        match rule.condition_mode {
            ConditionMode::All => rule.conditions.iter().all(|c| self.evaluate_condition(c, now_local)),
            ConditionMode::Any => rule.conditions.iter().any(|c| self.evaluate_condition(c, now_local)),
        }
    }

    fn evaluate_condition(&self, condition: &Condition, now_local: DateTime<Local>) -> bool {
        match condition.condition_type {
            ConditionType::DeviceState => {
                let (Some(device_id), Some(property)) = (&condition.device_id, &condition.property) else {
                    return false;
                };
                let cached = {
                    let cache = self.cache.lock().expect("engine cache poisoned");
                    cache.device_state.get(device_id).and_then(|m| m.get(property)).cloned()
                };
                let Some(cached) = cached else {
                    return false;
                };
                let op = condition.operator.unwrap_or(Operator::Equals);
                let new = Value::from_json(cached);
                let target = condition.value.as_ref().map(|v| Value::from_json(v.clone()));
                let target2 = condition.value2.as_ref().map(|v| Value::from_json(v.clone()));
                op.evaluate(None, &new, target.as_ref(), target2.as_ref())
            }
            ConditionType::TimeRange => {
                let (Some(start), Some(end)) = (&condition.time_start, &condition.time_end) else {
                    return false;
                };
                let (Some((sh, sm)), Some((eh, em))) = (parse_hhmm(start), parse_hhmm(end)) else {
                    return false;
                };
                let now_minutes = now_local.hour() * 60 + now_local.minute();
                let start_minutes = sh * 60 + sm;
                let end_minutes = eh * 60 + em;
                if end_minutes < start_minutes {
                    now_minutes >= start_minutes || now_minutes < end_minutes
                } else {
                    now_minutes >= start_minutes && now_minutes <= end_minutes
                }
            }
            ConditionType::DayOfWeek => match &condition.days_of_week {
                None => true,
                Some(days) if days.is_empty() => true,
                Some(days) => days.contains(&now_local.weekday()),
            },
            ConditionType::SunPosition => {
                let Some(location) = self.location else {
                    return false;
                };
                let event_name = condition.value.as_ref().and_then(Json::as_str).unwrap_or("sunset");
                let event = if event_name.eq_ignore_ascii_case("sunrise") {
                    SunEvent::Sunrise
                } else {
                    SunEvent::Sunset
                };
                let date = now_local.date_naive();
                let (sunrise_ts, sunset_ts) = sunrise::sunrise_sunset(
                    location.latitude,
                    location.longitude,
                    date.year(),
                    date.month(),
                    date.day(),
                );
                let epoch = match event {
                    SunEvent::Sunrise => sunrise_ts,
                    SunEvent::Sunset => sunset_ts,
                };
                let Some(at_utc) = DateTime::<Utc>::from_timestamp(epoch, 0) else {
                    return false;
                };
                let local = at_utc.with_timezone(&Local);
                let sun_minutes = (local.hour() * 60 + local.minute()) as f64;
                let now_minutes = (now_local.hour() * 60 + now_local.minute()) as f64;
                let op = condition.operator.unwrap_or(Operator::GreaterThanOrEqual);
                op.evaluate(None, &Value::Number(now_minutes), Some(&Value::Number(sun_minutes)), None)
            }
            ConditionType::And => condition.children.iter().all(|c| self.evaluate_condition(c, now_local)),
            ConditionType::Or => condition.children.iter().any(|c| self.evaluate_condition(c, now_local)),
        }
    }

    async fn execute_action(&self, action: &Action) -> std::result::Result<(), String> {
        match action.action_type {
            ActionType::SetDeviceState => {
                self.set_device_state(action.device_id.as_ref(), action.property.as_deref(), action.value.clone())
                    .await
            }
            ActionType::ToggleDevice => self.toggle_device(action).await,
            ActionType::Delay => {
                if let Some(seconds) = action.delay_seconds {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                }
                Ok(())
            }
            ActionType::Webhook => self.webhook(action).await,
            ActionType::ActivateScene => self.activate_scene(action).await,
            ActionType::Notification => {
                tracing::info!(
                    title = ?action.notification_title,
                    message = ?action.notification_message,
                    "notification action (log-only surface)"
                );
                Ok(())
            }
            ActionType::RunAutomation => {
                tracing::info!(run_automation_id = ?action.run_automation_id, "run-automation treated as a no-op");
                Ok(())
            }
        }
    }

    async fn set_device_state(
        &self,
        device_id: Option<&DeviceId>,
        property: Option<&str>,
        value: Option<Json>,
    ) -> std::result::Result<(), String> {
        let device_id = device_id.ok_or_else(|| "action missing device_id".to_string())?;
        let property = property.ok_or_else(|| "action missing property".to_string())?;
        let value = value.ok_or_else(|| "action missing value".to_string())?;
        let topic = format!("{}/{}/set", self.base_topic, device_id.as_str());
        let payload = serde_json::json!({ property: value });
        self.publisher.publish(&topic, payload).await.map_err(|e| e.to_string())
    }

    async fn toggle_device(&self, action: &Action) -> std::result::Result<(), String> {
        let device_id = action.device_id.clone().ok_or_else(|| "action missing device_id".to_string())?;
        let property = action.property.clone().unwrap_or_else(|| "state".to_string());
        let cached = self.cached_device_value(&device_id, &property).await;
        let new_on = match &cached {
            Some(Json::Bool(b)) => !b,
            Some(Json::String(s)) => !s.eq_ignore_ascii_case("on"),
            _ => true,
        };
        let value = Json::String(if new_on { "ON" } else { "OFF" }.to_string());
        self.set_device_state(Some(&device_id), Some(&property), Some(value)).await
    }

    async fn webhook(&self, action: &Action) -> std::result::Result<(), String> {
        let url = action.webhook_url.clone().ok_or_else(|| "action missing webhook_url".to_string())?;
        let method = action
            .webhook_method
            .as_deref()
            .and_then(|m| reqwest::Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(reqwest::Method::POST);
        let mut request = self.http.request(method, &url);
        if let Some(body) = &action.webhook_body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("webhook returned non-2xx status {}", response.status()));
        }
        Ok(())
    }

    async fn activate_scene(&self, action: &Action) -> std::result::Result<(), String> {
        let scene_id = action.scene_id.ok_or_else(|| "action missing scene_id".to_string())?;
        let scene = self.store.scenes.get(&scene_id).map_err(|e| e.to_string())?;
        let pairs = scene.device_property_pairs();
        let attempted = pairs.len();
        let mut failures = 0usize;
        for (device_id, property, value) in pairs {
            if let Err(e) = self.set_device_state(Some(device_id), Some(property), Some(value.clone())).await {
                tracing::warn!(device = %device_id, property, error = %e, "scene sub-action failed");
                failures += 1;
            }
        }
        if attempted > 0 && failures == attempted {
            Err(format!("all {attempted} scene device updates failed"))
        } else {
            Ok(())
        }
    }
}

fn action_target_device(action: &Action) -> Option<DeviceId> {
    match action.action_type {
        ActionType::SetDeviceState | ActionType::ToggleDevice => action.device_id.clone(),
        _ => None,
    }
}

fn parse_hhmm(expr: &str) -> Option<(u32, u32)> {
    let (h, m) = expr.split_once(':')?;
    Some((h.trim().parse().ok()?, m.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::broadcaster::RecordingBroadcaster;
    use sdhome_core::clock::FixedClock;
    use sdhome_core::ids::DeviceId;
    use sdhome_core::model::{ActionType, ConditionType, TriggerType};
    use sdhome_core::publisher::RecordingPublisher;

    fn make_engine(
        store: Arc<Store>,
        clock: Arc<FixedClock>,
    ) -> (Arc<AutomationEngine>, Arc<RecordingPublisher>, Arc<RecordingBroadcaster>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = Arc::new(crate::e2e_tracker::E2eTracker::new(broadcaster.clone()));
        let engine = Arc::new(AutomationEngine::new(
            store,
            publisher.clone(),
            broadcaster.clone(),
            clock,
            tracker,
            None,
            "sdhome",
        ));
        (engine, publisher, broadcaster)
    }

    fn motion_to_light_rule() -> AutomationRule {
        let mut rule = AutomationRule::new("motion-to-light");
        rule.cooldown_seconds = 60;
        let mut trigger = Trigger::new(rule.id, TriggerType::DeviceState);
        trigger.device_id = Some(DeviceId::new("hallway_motion"));
        trigger.property = Some("occupancy".to_string());
        trigger.operator = Some(Operator::ChangesTo);
        trigger.value = Some(Json::Bool(true));
        rule.triggers.push(trigger);

        let mut action = Action::new(rule.id, ActionType::SetDeviceState);
        action.device_id = Some(DeviceId::new("hallway_light"));
        action.property = Some("state".to_string());
        action.value = Some(Json::String("ON".to_string()));
        rule.actions.push(action);
        rule
    }

    #[tokio::test]
    async fn motion_triggers_light_and_logs_success() {
        let (store, _dir) = Store::open_temp();
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (engine, publisher, broadcaster) = make_engine(store.clone(), clock.clone());

        store.rules.save(&motion_to_light_rule()).unwrap();

        engine
            .process_device_state_change(
                &DeviceId::new("hallway_motion"),
                "occupancy",
                Some(Json::Bool(false)),
                Json::Bool(true),
                None,
            )
            .await;

        let published = publisher.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "sdhome/hallway_light/set");
        assert_eq!(published[0].1, serde_json::json!({"state": "ON"}));

        let logs = broadcaster.automation_logs.lock().await;
        assert!(logs.iter().any(|l| matches!(l.phase, LogPhase::ExecutionCompleted)));
    }

    #[tokio::test]
    async fn cooldown_blocks_second_firing() {
        let (store, _dir) = Store::open_temp();
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (engine, publisher, broadcaster) = make_engine(store.clone(), clock.clone());

        store.rules.save(&motion_to_light_rule()).unwrap();

        engine
            .process_device_state_change(
                &DeviceId::new("hallway_motion"),
                "occupancy",
                Some(Json::Bool(false)),
                Json::Bool(true),
                None,
            )
            .await;
        clock.advance(chrono::Duration::seconds(30));
        engine
            .process_device_state_change(
                &DeviceId::new("hallway_motion"),
                "occupancy",
                Some(Json::Bool(false)),
                Json::Bool(true),
                None,
            )
            .await;

        assert_eq!(publisher.published.lock().await.len(), 1, "second firing should be skipped by cooldown");
        let logs = broadcaster.automation_logs.lock().await;
        assert!(logs.iter().any(|l| matches!(l.phase, LogPhase::CooldownActive)));
    }

    #[tokio::test]
    async fn toggle_device_defaults_to_on_with_no_cache() {
        let (store, _dir) = Store::open_temp();
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (engine, publisher, _broadcaster) = make_engine(store.clone(), clock);

        let mut rule = AutomationRule::new("double-press-toggle");
        let mut trigger = Trigger::new(rule.id, TriggerType::TriggerEvent);
        trigger.device_id = Some(DeviceId::new("kitchen_button"));
        trigger.property = Some("button".to_string());
        trigger.value = Some(Json::String("double".to_string()));
        rule.triggers.push(trigger);
        let mut action = Action::new(rule.id, ActionType::ToggleDevice);
        action.device_id = Some(DeviceId::new("kitchen_light"));
        action.property = Some("state".to_string());
        rule.actions.push(action);
        store.rules.save(&rule).unwrap();

        let event = TriggerEvent {
            id: uuid::Uuid::new_v4(),
            signal_event_id: sdhome_core::ids::SignalEventId::new(),
            timestamp: Utc::now(),
            device_id: DeviceId::new("kitchen_button"),
            capability: "button".to_string(),
            trigger_type: "button".to_string(),
            trigger_sub_type: Some("double".to_string()),
            value: Some(true),
        };
        engine.process_trigger_event(&event, None).await;

        let published = publisher.published.lock().await;
        assert_eq!(published[0].1, serde_json::json!({"state": "ON"}));
    }

    #[tokio::test]
    async fn empty_day_of_week_condition_is_always_true() {
        let (store, _dir) = Store::open_temp();
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (engine, publisher, _broadcaster) = make_engine(store.clone(), clock);

        let mut rule = AutomationRule::new("conditional-rule");
        let mut trigger = Trigger::new(rule.id, TriggerType::DeviceState);
        trigger.device_id = Some(DeviceId::new("d1"));
        trigger.property = Some("state".to_string());
        trigger.operator = Some(Operator::AnyChange);
        rule.triggers.push(trigger);
        let mut condition = Condition::new(rule.id, ConditionType::DayOfWeek);
        condition.days_of_week = Some(vec![]);
        rule.conditions.push(condition);
        let mut action = Action::new(rule.id, ActionType::SetDeviceState);
        action.device_id = Some(DeviceId::new("d2"));
        action.property = Some("state".to_string());
        action.value = Some(Json::String("ON".to_string()));
        rule.actions.push(action);
        store.rules.save(&rule).unwrap();

        engine
            .process_device_state_change(
                &DeviceId::new("d1"),
                "state",
                Some(Json::String("OFF".to_string())),
                Json::String("ON".to_string()),
                None,
            )
            .await;
        assert_eq!(publisher.published.lock().await.len(), 1);
    }
}
