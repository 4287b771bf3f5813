//! 历史日志：按提交顺序追加、按 ID 原地更新
//!
//! 位置反映提交顺序，内容反映当前状态。有容量上限时优先淘汰最旧的终态条目，在途条目永不淘汰。

use serde::{Deserialize, Serialize};

use super::id::CorrelationId;
use super::types::{CommandRecord, CommandStatus, CommandType};
use crate::core::FailureKind;

/// 面向展示的历史条目（CommandRecord 的投影，或一次翻译失败的尝试）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: CorrelationId,
    pub agent_id: String,
    pub raw_input: String,
    /// 翻译失败的尝试没有解析出的指令
    pub command: Option<String>,
    pub command_type: Option<CommandType>,
    pub explanation: Option<String>,
    /// 下发时的超时（毫秒），翻译失败为 0
    pub timeout_ms: u64,
    pub status: CommandStatus,
    pub failure: Option<FailureKind>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub submitted_at: i64,
    pub completed_at: Option<i64>,
    pub retry_count: u32,
    pub cause_id: Option<CorrelationId>,
}

impl HistoryEntry {
    pub fn from_record(record: &CommandRecord) -> Self {
        let request = &record.request;
        Self {
            id: request.correlation_id.clone(),
            agent_id: request.agent_id.clone(),
            raw_input: request.raw_input.clone(),
            command: Some(request.resolved_command.clone()),
            command_type: Some(request.command_type.clone()),
            explanation: None,
            timeout_ms: request.timeout_ms,
            status: record.status,
            failure: record.failure,
            output: record.output.clone(),
            error: record.error.clone(),
            submitted_at: request.submitted_at,
            completed_at: record.completed_at,
            retry_count: request.retry_count,
            cause_id: request.cause_id.clone(),
        }
    }

    /// 翻译失败的尝试：直接以 Failed 入历史，从未下发
    pub fn translation_failure(
        id: CorrelationId,
        agent_id: impl Into<String>,
        raw_input: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            agent_id: agent_id.into(),
            raw_input: raw_input.into(),
            command: None,
            command_type: None,
            explanation: None,
            timeout_ms: 0,
            status: CommandStatus::Failed,
            failure: Some(FailureKind::Translation),
            output: None,
            error: Some(error.into()),
            submitted_at: now,
            completed_at: Some(now),
            retry_count: 0,
            cause_id: None,
        }
    }

    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = explanation.filter(|e| !e.trim().is_empty());
        self
    }

    /// 用记录的最新状态刷新条目（不改变其在日志中的位置）
    pub fn sync_from(&mut self, record: &CommandRecord) {
        self.status = record.status;
        self.failure = record.failure;
        self.output = record.output.clone();
        self.error = record.error.clone();
        self.completed_at = record.completed_at;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 单行渲染：`[OK] a1 $ whoami → root`
    pub fn display_line(&self) -> String {
        let badge = match self.failure {
            Some(kind) if self.status == CommandStatus::Failed => {
                format!("{}:{}", self.status.badge(), kind)
            }
            _ => self.status.badge().to_string(),
        };
        let command = self.command.as_deref().unwrap_or(self.raw_input.as_str());
        let detail = match (&self.output, &self.error) {
            (_, Some(err)) => format!(" → {}", err),
            (Some(out), None) => format!(" → {}", out.trim_end()),
            (None, None) => String::new(),
        };
        format!("[{}] {} $ {}{}", badge, self.agent_id, command, detail)
    }
}

/// 历史变更通知（UI 作为纯订阅者）
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    Appended(HistoryEntry),
    Updated(HistoryEntry),
    Evicted(CorrelationId),
}

/// 历史日志
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    /// None 表示不限容量
    capacity: Option<usize>,
}

impl HistoryLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.filter(|c| *c > 0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// 追加条目，返回因容量被淘汰的条目 ID
    pub fn append(&mut self, entry: HistoryEntry) -> Vec<CorrelationId> {
        self.entries.push(entry);
        self.evict_overflow()
    }

    /// 按 ID 原地修改；不存在时返回 None
    pub fn update_by_id<F>(&mut self, id: &CorrelationId, patch: F) -> Option<&HistoryEntry>
    where
        F: FnOnce(&mut HistoryEntry),
    {
        let entry = self.entries.iter_mut().rev().find(|e| &e.id == id)?;
        patch(entry);
        Some(entry)
    }

    pub fn get(&self, id: &CorrelationId) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| &e.id == id)
    }

    /// 按提交顺序返回快照
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 超出容量时按提交顺序淘汰最早的终态条目，返回被淘汰的 ID
    ///
    /// 在途条目落终态后也要调用：追加时无法淘汰的溢出要在这里补上。
    pub fn evict_overflow(&mut self) -> Vec<CorrelationId> {
        let capacity = match self.capacity {
            Some(c) => c,
            None => return Vec::new(),
        };

        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let Some(pos) = self.entries.iter().position(|e| e.is_terminal()) else {
                // 全部在途：宁可超出容量也不丢记录
                break;
            };
            evicted.push(self.entries.remove(pos).id);
        }

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted terminal history entries");
        }
        evicted
    }
}
