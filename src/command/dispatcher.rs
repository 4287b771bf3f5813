//! 下发：校验前置条件，登记在途记录并布防超时，再交给传输层

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::engine::CommandEngine;
use super::history::HistoryEntry;
use super::id::CorrelationId;
use super::types::{CommandRecord, CommandRequest, CommandType};
use crate::core::{DispatchError, FailureKind};
use crate::transport::DispatchMessage;

/// 一次下发所需的全部字段（操作员提交与重试共用）
#[derive(Debug, Clone)]
pub(super) struct DispatchPlan {
    pub(super) agent_id: String,
    pub(super) raw_input: String,
    pub(super) resolved_command: String,
    pub(super) command_type: CommandType,
    pub(super) timeout_ms: u64,
    pub(super) explanation: Option<String>,
    pub(super) cause_id: Option<CorrelationId>,
    pub(super) retry_count: u32,
}

impl CommandEngine {
    /// 直接下发一条已解析的指令
    ///
    /// 前置条件（Agent 已知且在线、超时 > 0）不满足时返回错误，不产生任何记录。
    /// 传输层同步失败时记录以 Failed(dispatch) 落终态，错误中带回其关联 ID。
    pub async fn dispatch(
        &self,
        agent_id: &str,
        resolved_command: impl Into<String>,
        command_type: CommandType,
        timeout_ms: u64,
    ) -> Result<CorrelationId, DispatchError> {
        let command = resolved_command.into();
        self.dispatch_plan(DispatchPlan {
            agent_id: agent_id.to_string(),
            raw_input: command.clone(),
            resolved_command: command,
            command_type,
            timeout_ms,
            explanation: None,
            cause_id: None,
            retry_count: 0,
        })
        .await
    }

    pub(super) async fn dispatch_plan(&self, plan: DispatchPlan) -> Result<CorrelationId, DispatchError> {
        if plan.timeout_ms == 0 {
            return Err(DispatchError::InvalidTimeout);
        }
        let agent = self
            .inner
            .agents
            .get(&plan.agent_id)
            .await
            .ok_or_else(|| DispatchError::UnknownAgent(plan.agent_id.clone()))?;
        if !agent.is_online() {
            return Err(DispatchError::AgentOffline(plan.agent_id.clone()));
        }

        let id = CorrelationId::mint();
        let timeout_ms = plan.timeout_ms;
        let request_agent = plan.agent_id.clone();
        let message = DispatchMessage {
            correlation_id: id.clone(),
            agent_id: plan.agent_id.clone(),
            command: plan.resolved_command.clone(),
            command_type: plan.command_type.clone(),
        };
        let record = CommandRecord::new(CommandRequest {
            correlation_id: id.clone(),
            agent_id: plan.agent_id,
            raw_input: plan.raw_input,
            resolved_command: plan.resolved_command,
            command_type: plan.command_type,
            timeout_ms,
            submitted_at: chrono::Utc::now().timestamp_millis(),
            cause_id: plan.cause_id,
            retry_count: plan.retry_count,
        });

        {
            let mut ledger = self.inner.ledger.write().await;
            // 在写锁内复查在线状态：离线推送要么先于此处被看到，要么其批量取消排在本次登记之后
            let still_online = match self.inner.agents.get(&request_agent).await {
                Some(agent) => agent.is_online(),
                None => false,
            };
            if !still_online {
                return Err(DispatchError::AgentOffline(request_agent));
            }
            let entry = HistoryEntry::from_record(&record).with_explanation(plan.explanation);
            if ledger.registry.register(id.clone(), record).is_err() {
                return Err(DispatchError::Duplicate(id));
            }
            self.append_history(&mut ledger, entry);
            // 发送前布防，发送挂起也会超时
            self.arm_timeout(&id, Duration::from_millis(timeout_ms));
        }

        tracing::info!(
            correlation_id = %id,
            agent_id = %message.agent_id,
            command = %message.command,
            timeout_ms,
            "dispatching command"
        );

        // 发送期间不持锁；回执或超时可能先于 send 返回
        let sent = self.inner.transport.send(message).await;
        let Err(e) = sent else {
            return Ok(id);
        };

        let reason = e.to_string();
        let failed = {
            let mut ledger = self.inner.ledger.write().await;
            self.finalize(&mut ledger, &id, |r| r.fail(FailureKind::Dispatch, reason.clone()))
                .ok()
        };

        tracing::warn!(correlation_id = %id, "Transport rejected command: {}", reason);
        if let Some(record) = failed {
            self.notify_relay(&record).await;
        }
        Err(DispatchError::Transport {
            correlation_id: id,
            reason,
        })
    }

    /// 布防超时；回调只持有 Weak，引擎释放后计时器自然失效
    fn arm_timeout(&self, id: &CorrelationId, after: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let timer_id = id.clone();
        self.inner.timeouts.arm(id.clone(), Instant::now() + after, async move {
            if let Some(inner) = weak.upgrade() {
                CommandEngine { inner }.expire(&timer_id).await;
            }
        });
    }
}
