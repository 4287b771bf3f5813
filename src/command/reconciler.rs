//! 回执对账：把完成事件、确认、超时、断连、取消落到在途记录上
//!
//! 所有终态迁移都走 finalize：写锁内先查注册表，查不到即视为已结算，事件丢弃并记日志。

use super::engine::{CommandEngine, Ledger};
use super::id::CorrelationId;
use super::types::{CommandRecord, CommandStatus, Outcome};
use crate::agent::{AgentStatus, AgentStatusUpdate};
use crate::core::{CommandError, FailureKind};

/// 一次对账的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// 已应用，记录迁移到给定状态
    Applied(CommandStatus),
    /// 关联 ID 不在途（重复、迟到或未知），已丢弃
    Dropped,
}

impl Reconciliation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Reconciliation::Applied(_))
    }
}

impl CommandEngine {
    /// 应用 Agent 回报的结果
    pub async fn resolve(&self, id: &CorrelationId, outcome: Outcome) -> Reconciliation {
        self.settle(id, |record| record.apply_outcome(outcome)).await
    }

    /// 操作员取消在途指令
    pub async fn cancel(&self, id: &CorrelationId) -> Reconciliation {
        self.settle(id, |record| record.fail(FailureKind::Cancelled, "cancelled by operator"))
            .await
    }

    /// Agent 确认开始执行：Pending → Executing
    pub async fn acknowledge(&self, id: &CorrelationId) -> Reconciliation {
        let mut ledger = self.inner.ledger.write().await;
        let record = match ledger.registry.lookup_mut(id) {
            Ok(record) => record,
            Err(_) => {
                self.log_dropped(&ledger, id, "acknowledgement");
                return Reconciliation::Dropped;
            }
        };
        if record.status != CommandStatus::Pending {
            tracing::debug!(correlation_id = %id, "duplicate acknowledgement ignored");
            return Reconciliation::Dropped;
        }
        if let Err(e) = record.mark_executing() {
            tracing::warn!(correlation_id = %id, "{}", e);
            return Reconciliation::Dropped;
        }
        let record = record.clone();
        self.sync_history(&mut ledger, &record);
        tracing::debug!(correlation_id = %id, "command acknowledged");
        Reconciliation::Applied(CommandStatus::Executing)
    }

    /// 超时到期（由 TimeoutSupervisor 回调）
    pub async fn expire(&self, id: &CorrelationId) -> Reconciliation {
        let mut ledger = self.inner.ledger.write().await;
        if !ledger.registry.contains(id) {
            tracing::debug!(correlation_id = %id, "timer fired after command settled");
            return Reconciliation::Dropped;
        }
        let record = match self.finalize(&mut ledger, id, |record| record.time_out()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(correlation_id = %id, "{}", e);
                return Reconciliation::Dropped;
            }
        };
        drop(ledger);

        tracing::warn!(
            correlation_id = %id,
            agent_id = %record.request.agent_id,
            timeout_ms = record.request.timeout_ms,
            "command timed out"
        );
        self.notify_relay(&record).await;
        Reconciliation::Applied(record.status)
    }

    /// 以 AgentDisconnected 结束该 Agent 的全部在途指令，返回受影响条数
    pub async fn cancel_agent(&self, agent_id: &str) -> usize {
        let reason = format!("agent {} went offline", agent_id);
        let settled: Vec<CommandRecord> = {
            let mut ledger = self.inner.ledger.write().await;
            let ids = ledger.registry.ids_for_agent(agent_id);
            ids.iter()
                .filter_map(|id| {
                    self.finalize(&mut ledger, id, |record| {
                        record.fail(FailureKind::AgentDisconnected, reason.clone())
                    })
                    .ok()
                })
                .collect()
        };

        if !settled.is_empty() {
            tracing::warn!(agent_id, count = settled.len(), "Cancelled in-flight commands for offline agent");
        }
        for record in &settled {
            self.notify_relay(record).await;
        }
        settled.len()
    }

    /// 应用 Agent 状态推送；转为离线时批量结束其在途指令
    pub async fn apply_agent_status(&self, update: AgentStatusUpdate) -> usize {
        let previous = self
            .inner
            .agents
            .set_status(&update.agent_id, update.status)
            .await;
        let Some(previous) = previous else {
            tracing::warn!(agent_id = %update.agent_id, "status update for unknown agent ignored");
            return 0;
        };
        if previous != update.status {
            tracing::info!(agent_id = %update.agent_id, "agent is now {:?}", update.status);
        }
        match update.status {
            AgentStatus::Offline => self.cancel_agent(&update.agent_id).await,
            AgentStatus::Online => 0,
        }
    }

    async fn settle<F>(&self, id: &CorrelationId, apply: F) -> Reconciliation
    where
        F: FnOnce(&mut CommandRecord) -> Result<(), CommandError>,
    {
        let mut ledger = self.inner.ledger.write().await;
        if !ledger.registry.contains(id) {
            self.log_dropped(&ledger, id, "completion");
            return Reconciliation::Dropped;
        }
        let record = match self.finalize(&mut ledger, id, apply) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(correlation_id = %id, "{}", e);
                return Reconciliation::Dropped;
            }
        };
        drop(ledger);

        tracing::info!(
            correlation_id = %id,
            status = %record.status,
            "command settled"
        );
        self.notify_relay(&record).await;
        Reconciliation::Applied(record.status)
    }

    /// 落终态：应用迁移、移出注册表、解除计时器、原地刷新历史（调用方持写锁）
    pub(super) fn finalize<F>(
        &self,
        ledger: &mut Ledger,
        id: &CorrelationId,
        apply: F,
    ) -> Result<CommandRecord, CommandError>
    where
        F: FnOnce(&mut CommandRecord) -> Result<(), CommandError>,
    {
        apply(ledger.registry.lookup_mut(id)?)?;
        let record = ledger
            .registry
            .remove(id)
            .ok_or_else(|| CommandError::UnknownCorrelation(id.clone()))?;
        self.inner.timeouts.disarm(id);
        self.sync_history(ledger, &record);
        Ok(record)
    }

    fn log_dropped(&self, ledger: &Ledger, id: &CorrelationId, what: &str) {
        match ledger.history.get(id) {
            Some(entry) if entry.is_terminal() => {
                tracing::debug!(
                    correlation_id = %id,
                    status = %entry.status,
                    "late {} for settled command discarded",
                    what
                );
            }
            _ => {
                tracing::warn!("Discarding {}: {}", what, CommandError::UnknownCorrelation(id.clone()));
            }
        }
    }
}
