//! `AutomationRule` and its owned children (§3, §4.5).

use crate::ids::{ActionId, ConditionId, DeviceId, ExecutionLogId, RuleId, SceneId, TriggerId};
use crate::value::Operator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionMode {
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    pub is_enabled: bool,
    pub trigger_mode: TriggerMode,
    pub condition_mode: ConditionMode,
    pub cooldown_seconds: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl AutomationRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            is_enabled: true,
            trigger_mode: TriggerMode::Any,
            condition_mode: ConditionMode::All,
            cooldown_seconds: 0,
            last_triggered_at: None,
            execution_count: 0,
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// A rule with no triggers never fires automatically (§3 invariant).
    pub fn can_fire_automatically(&self) -> bool {
        self.is_enabled && !self.triggers.is_empty()
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) if self.cooldown_seconds > 0 => {
                (now - last).num_milliseconds() < (self.cooldown_seconds as i64) * 1000
            }
            _ => false,
        }
    }

    pub fn sorted_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().collect();
        actions.sort_by_key(|a| a.sort_order);
        actions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    DeviceState,
    Time,
    Sunrise,
    Sunset,
    SensorThreshold,
    Manual,
    TriggerEvent,
    SensorReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub rule_id: RuleId,
    pub trigger_type: TriggerType,
    pub device_id: Option<DeviceId>,
    pub property: Option<String>,
    pub operator: Option<Operator>,
    pub value: Option<Json>,
    /// `HH:mm`, local time.
    pub time_expression: Option<String>,
    pub sun_event: Option<SunEvent>,
    pub offset_minutes: i32,
    pub sort_order: i32,
}

impl Trigger {
    pub fn new(rule_id: RuleId, trigger_type: TriggerType) -> Self {
        Self {
            id: TriggerId::new(),
            rule_id,
            trigger_type,
            device_id: None,
            property: None,
            operator: None,
            value: None,
            time_expression: None,
            sun_event: None,
            offset_minutes: 0,
            sort_order: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    DeviceState,
    TimeRange,
    DayOfWeek,
    SunPosition,
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: ConditionId,
    pub rule_id: RuleId,
    pub condition_type: ConditionType,
    pub device_id: Option<DeviceId>,
    pub property: Option<String>,
    pub operator: Option<Operator>,
    pub value: Option<Json>,
    pub value2: Option<Json>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub days_of_week: Option<Vec<chrono::Weekday>>,
    /// Children of an `And`/`Or` composite condition; empty for leaves.
    pub children: Vec<Condition>,
    pub sort_order: i32,
}

impl Condition {
    pub fn new(rule_id: RuleId, condition_type: ConditionType) -> Self {
        Self {
            id: ConditionId::new(),
            rule_id,
            condition_type,
            device_id: None,
            property: None,
            operator: None,
            value: None,
            value2: None,
            time_start: None,
            time_end: None,
            days_of_week: None,
            children: Vec::new(),
            sort_order: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    SetDeviceState,
    ToggleDevice,
    Delay,
    Webhook,
    Notification,
    ActivateScene,
    RunAutomation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub rule_id: RuleId,
    pub action_type: ActionType,
    pub device_id: Option<DeviceId>,
    pub property: Option<String>,
    pub value: Option<Json>,
    pub delay_seconds: Option<u64>,
    pub webhook_url: Option<String>,
    pub webhook_method: Option<String>,
    pub webhook_body: Option<Json>,
    pub notification_title: Option<String>,
    pub notification_message: Option<String>,
    pub scene_id: Option<SceneId>,
    pub run_automation_id: Option<RuleId>,
    pub sort_order: i32,
}

impl Action {
    pub fn new(rule_id: RuleId, action_type: ActionType) -> Self {
        Self {
            id: ActionId::new(),
            rule_id,
            action_type,
            device_id: None,
            property: None,
            value: None,
            delay_seconds: None,
            webhook_url: None,
            webhook_method: None,
            webhook_body: None,
            notification_title: None,
            notification_message: None,
            scene_id: None,
            run_automation_id: None,
            sort_order: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    PartialFailure,
    Failure,
    SkippedCooldown,
    SkippedCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: ExecutionLogId,
    pub rule_id: RuleId,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    /// Opaque snapshot of whatever stimulus triggered the evaluation.
    pub trigger_source: Json,
    pub action_results: Vec<ActionResult>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

impl ExecutionLog {
    /// Aggregate action outcomes into a final status, per §4.5.5:
    /// `Success` if all succeed, `Failure` if all fail, `PartialFailure`
    /// otherwise.
    pub fn status_from_action_results(results: &[ActionResult]) -> ExecutionStatus {
        if results.is_empty() {
            return ExecutionStatus::Success;
        }
        let succeeded = results.iter().filter(|r| r.success).count();
        if succeeded == results.len() {
            ExecutionStatus::Success
        } else if succeeded == 0 {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::PartialFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_with_no_triggers_cannot_fire() {
        let rule = AutomationRule::new("empty");
        assert!(!rule.can_fire_automatically());
    }

    #[test]
    fn cooldown_compares_wall_clock() {
        let mut rule = AutomationRule::new("r");
        rule.cooldown_seconds = 60;
        rule.last_triggered_at = Some(Utc::now());
        assert!(rule.is_in_cooldown(Utc::now()));
        assert!(!rule.is_in_cooldown(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn actions_sort_by_sort_order() {
        let rule_id = RuleId::new();
        let mut rule = AutomationRule::new("r");
        let mut a = Action::new(rule_id, ActionType::Delay);
        a.sort_order = 2;
        let mut b = Action::new(rule_id, ActionType::Delay);
        b.sort_order = 1;
        rule.actions.push(a.clone());
        rule.actions.push(b.clone());
        let sorted = rule.sorted_actions();
        assert_eq!(sorted[0].id, b.id);
        assert_eq!(sorted[1].id, a.id);
    }

    #[test]
    fn status_aggregation_matches_spec() {
        let rid = RuleId::new();
        let ok = ActionResult {
            action_id: ActionId::new(),
            success: true,
            error: None,
            duration_ms: 1,
        };
        let err = ActionResult {
            action_id: ActionId::new(),
            success: false,
            error: Some("boom".into()),
            duration_ms: 1,
        };
        assert!(matches!(
            ExecutionLog::status_from_action_results(&[ok.clone(), ok.clone()]),
            ExecutionStatus::Success
        ));
        assert!(matches!(
            ExecutionLog::status_from_action_results(&[err.clone(), err.clone()]),
            ExecutionStatus::Failure
        ));
        assert!(matches!(
            ExecutionLog::status_from_action_results(&[ok, err]),
            ExecutionStatus::PartialFailure
        ));
        let _ = rid;
    }
}
