//! Entity types from the data model (§3).

pub mod device;
pub mod rule;
pub mod scene;
pub mod signal;

pub use device::{Device, DeviceType, Zone};
pub use rule::{
    Action, ActionResult, ActionType, AutomationRule, Condition, ConditionMode, ConditionType,
    ExecutionLog, ExecutionStatus, SunEvent, Trigger, TriggerMode, TriggerType,
};
pub use scene::Scene;
pub use signal::{
    DeviceKind, EventCategory, PipelineSnapshot, SensorReading, SignalEvent, TriggerEvent,
};
