//! 指令生命周期错误分类
//!
//! 只有 TranslationError 与 DispatchError 会在调用点同步返回；
//! 远端失败、超时、Agent 断连经由 Reconciler / TimeoutSupervisor 异步落到记录上（见 FailureKind）。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{CommandStatus, CorrelationId};

/// 翻译适配器无法产出指令（不会下发，历史中记一条失败尝试）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("input is empty")]
    EmptyInput,

    #[error("agent platform is unknown, cannot translate")]
    MissingPlatform,

    #[error("translation backend error: {0}")]
    Backend(String),

    #[error("malformed translation response: {0}")]
    Malformed(String),
}

/// 下发失败：前置条件不满足，或传输层同步拒绝
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent {0} is offline")]
    AgentOffline(String),

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    /// 关联 ID 已在注册表中，指令未发出
    #[error("correlation id {0} already registered")]
    Duplicate(CorrelationId),

    /// 记录已创建并转为 Failed，携带其关联 ID 供界面定位
    #[error("transport rejected command {correlation_id}: {reason}")]
    Transport {
        correlation_id: CorrelationId,
        reason: String,
    },
}

/// 引擎级错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// 关联 ID 不在注册表中（重复投递或迟到事件），只记日志，不呈现给操作员
    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(CorrelationId),

    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: CommandStatus,
        to: CommandStatus,
    },

    #[error("command {id} cannot be retried while {status:?}")]
    NotRetryable {
        id: CorrelationId,
        status: CommandStatus,
    },

    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

/// 终态失败原因，挂在记录与历史条目上，决定状态徽标文案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 翻译失败，从未下发
    Translation,
    /// 传输层拒绝发送
    Dispatch,
    /// Agent 回报执行失败
    RemoteExecution,
    /// 截止时间内无回执
    TimedOut,
    /// Agent 离线导致的批量取消
    AgentDisconnected,
    /// 操作员取消
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Translation => write!(f, "translation"),
            FailureKind::Dispatch => write!(f, "dispatch"),
            FailureKind::RemoteExecution => write!(f, "remote"),
            FailureKind::TimedOut => write!(f, "timeout"),
            FailureKind::AgentDisconnected => write!(f, "disconnected"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_error_converts_into_command_error() {
        let err: CommandError = TranslationError::EmptyInput.into();
        assert!(matches!(err, CommandError::Translation(TranslationError::EmptyInput)));
        assert_eq!(err.to_string(), "translation failed: input is empty");
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::AgentDisconnected.to_string(), "disconnected");
        assert_eq!(FailureKind::TimedOut.to_string(), "timeout");
    }
}
