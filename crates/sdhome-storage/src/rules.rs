//! `AutomationRule` storage (§3, §6).
//!
//! A rule's triggers/conditions/actions are owned and always loaded/saved
//! together with it, so the rule — including its children — is persisted as
//! one JSON aggregate rather than four separate tables; deleting the rule
//! deletes the whole aggregate in one write, which is what "cascade delete"
//! means in practice here. `AutomationExecutionLog` is append-only and kept
//! in its own table since logs may outlive the rule that produced them (§3:
//! "survive rule deletion only if explicitly retained").

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::RuleId;
use sdhome_core::model::{AutomationRule, ExecutionLog};

use crate::db::{map_not_found, Db};
use crate::error::Result;
use crate::sort_key::descending_key;

const RULES: TableDefinition<&str, &str> = TableDefinition::new("automation_rules");
const EXECUTION_LOGS: TableDefinition<&str, &str> = TableDefinition::new("automation_execution_logs");
const LOGS_BY_RULE: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("automation_execution_logs_by_rule");

pub struct RuleRepo {
    db: Arc<Db>,
}

impl RuleRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, rule: &AutomationRule) -> Result<()> {
        let json = serde_json::to_string(rule)?;
        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(RULES)?;
            table.insert(rule.id.to_string().as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &RuleId) -> Result<AutomationRule> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(RULES)?;
        let raw = table.get(id.to_string().as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "AutomationRule")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn try_get(&self, id: &RuleId) -> Result<Option<AutomationRule>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(RULES)?;
        match table.get(id.to_string().as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// Every rule that can fire automatically, for the engine's trigger scan
    /// (§4.5.1). Disabled rules and rules without triggers are still stored
    /// here; callers filter with `AutomationRule::can_fire_automatically`.
    pub fn list(&self) -> Result<Vec<AutomationRule>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(RULES)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_str(value.value())?);
        }
        Ok(out)
    }

    pub fn delete(&self, id: &RuleId) -> Result<bool> {
        let write_txn = self.db.inner.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(RULES)?;
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    pub fn append_execution_log(&self, log: &ExecutionLog) -> Result<()> {
        let json = serde_json::to_string(log)?;
        let id = log.id.to_string();
        let rule_id = log.rule_id.to_string();
        let sort_key = descending_key(log.executed_at, &id);

        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(EXECUTION_LOGS)?;
            table.insert(id.as_str(), json.as_str())?;

            let mut index = write_txn.open_table(LOGS_BY_RULE)?;
            index.insert((rule_id.as_str(), sort_key.as_str()), id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn list_execution_logs(&self, rule_id: &RuleId, limit: usize) -> Result<Vec<ExecutionLog>> {
        let read_txn = self.db.inner.begin_read()?;
        let index = read_txn.open_table(LOGS_BY_RULE)?;
        let logs = read_txn.open_table(EXECUTION_LOGS)?;

        let key = rule_id.to_string();
        let start = (key.as_str(), "");
        let end = (key.as_str(), "\x7F");
        let mut out = Vec::new();
        for entry in index.range(start..=end)? {
            if out.len() >= limit {
                break;
            }
            let (_, id_value) = entry?;
            if let Some(raw) = logs.get(id_value.value())? {
                out.push(serde_json::from_str(raw.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::model::{ActionResult, ExecutionStatus};
    use sdhome_core::ids::{ActionId, ExecutionLogId};

    #[test]
    fn save_and_get_roundtrip() {
        let (db, _dir) = Db::open_temp();
        let repo = RuleRepo::new(db);
        let rule = AutomationRule::new("Evening lights");
        repo.save(&rule).unwrap();
        let loaded = repo.get(&rule.id).unwrap();
        assert_eq!(loaded.name, "Evening lights");
    }

    #[test]
    fn delete_removes_the_whole_aggregate() {
        let (db, _dir) = Db::open_temp();
        let repo = RuleRepo::new(db);
        let rule = AutomationRule::new("one-shot");
        repo.save(&rule).unwrap();
        assert!(repo.delete(&rule.id).unwrap());
        assert!(repo.try_get(&rule.id).unwrap().is_none());
    }

    #[test]
    fn execution_logs_survive_rule_deletion() {
        let (db, _dir) = Db::open_temp();
        let repo = RuleRepo::new(db);
        let rule = AutomationRule::new("r");
        repo.save(&rule).unwrap();

        let log = ExecutionLog {
            id: ExecutionLogId::new(),
            rule_id: rule.id,
            executed_at: chrono::Utc::now(),
            status: ExecutionStatus::Success,
            trigger_source: serde_json::json!({"kind": "manual"}),
            action_results: vec![ActionResult {
                action_id: ActionId::new(),
                success: true,
                error: None,
                duration_ms: 5,
            }],
            duration_ms: 5,
            error_message: None,
        };
        repo.append_execution_log(&log).unwrap();
        repo.delete(&rule.id).unwrap();

        let logs = repo.list_execution_logs(&rule.id, 10).unwrap();
        assert_eq!(logs.len(), 1);
    }
}
