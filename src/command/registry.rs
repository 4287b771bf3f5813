//! 关联注册表：关联 ID → 在途记录
//!
//! 记录在表中 当且仅当 其状态非终态；落终态即移除。先写者胜：移除后到达的事件只记日志，不会重新插入。

use std::collections::HashMap;

use super::id::CorrelationId;
use super::types::CommandRecord;
use crate::core::CommandError;

#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    records: HashMap<CorrelationId, CommandRecord>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册在途记录；重复 ID 或终态记录一律拒绝
    pub fn register(&mut self, id: CorrelationId, record: CommandRecord) -> Result<(), CommandError> {
        if record.is_terminal() {
            return Err(CommandError::InvalidTransition {
                from: record.status,
                to: record.status,
            });
        }
        if self.records.contains_key(&id) {
            return Err(CommandError::DuplicateCorrelation(id));
        }
        self.records.insert(id, record);
        Ok(())
    }

    pub fn lookup(&self, id: &CorrelationId) -> Result<&CommandRecord, CommandError> {
        self.records
            .get(id)
            .ok_or_else(|| CommandError::UnknownCorrelation(id.clone()))
    }

    pub fn lookup_mut(&mut self, id: &CorrelationId) -> Result<&mut CommandRecord, CommandError> {
        self.records
            .get_mut(id)
            .ok_or_else(|| CommandError::UnknownCorrelation(id.clone()))
    }

    pub fn remove(&mut self, id: &CorrelationId) -> Option<CommandRecord> {
        self.records.remove(id)
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.records.contains_key(id)
    }

    /// 指定 Agent 的全部在途指令（按提交时间排序）
    pub fn ids_for_agent(&self, agent_id: &str) -> Vec<CorrelationId> {
        let mut pending: Vec<_> = self
            .records
            .values()
            .filter(|r| r.request.agent_id == agent_id)
            .map(|r| (r.request.submitted_at, r.id().clone()))
            .collect();
        pending.sort();
        pending.into_iter().map(|(_, id)| id).collect()
    }

    pub fn ids(&self) -> Vec<CorrelationId> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::types::{CommandRequest, CommandType};

    fn record(agent: &str) -> CommandRecord {
        CommandRecord::new(CommandRequest {
            correlation_id: CorrelationId::mint(),
            agent_id: agent.to_string(),
            raw_input: "ls".to_string(),
            resolved_command: "ls".to_string(),
            command_type: CommandType::Bash,
            timeout_ms: 1000,
            submitted_at: 0,
            cause_id: None,
            retry_count: 0,
        })
    }

    #[test]
    fn test_register_lookup_remove() {
        let mut registry = CorrelationRegistry::new();
        let r = record("a1");
        let id = r.id().clone();

        registry.register(id.clone(), r).unwrap();
        assert!(registry.lookup(&id).is_ok());

        assert!(registry.remove(&id).is_some());
        assert!(matches!(
            registry.lookup(&id),
            Err(CommandError::UnknownCorrelation(_))
        ));
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut registry = CorrelationRegistry::new();
        let r = record("a1");
        let id = r.id().clone();
        registry.register(id.clone(), r.clone()).unwrap();
        assert!(matches!(
            registry.register(id, r),
            Err(CommandError::DuplicateCorrelation(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_terminal_record_rejected() {
        let mut registry = CorrelationRegistry::new();
        let mut r = record("a1");
        r.time_out().unwrap();
        assert!(registry.register(r.id().clone(), r).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_for_agent() {
        let mut registry = CorrelationRegistry::new();
        for agent in ["a1", "a2", "a1"] {
            let r = record(agent);
            registry.register(r.id().clone(), r).unwrap();
        }
        assert_eq!(registry.ids_for_agent("a1").len(), 2);
        assert_eq!(registry.ids_for_agent("a3").len(), 0);
    }
}
