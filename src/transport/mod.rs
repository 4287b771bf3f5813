//! 传输层边界
//!
//! 本 crate 不实现具体传输（WebSocket / HTTP），只定义：
//! - 出站：DispatchMessage 经 Transport::send 发出
//! - 入站：CompletionEvent / Acknowledgement / AgentStatusUpdate 汇成 InboundEvent 交给引擎
//!
//! ChannelTransport 用 mpsc 把出站消息交给进程内的对端（测试、演示控制台）。

pub mod loopback;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agent::AgentStatusUpdate;
use crate::command::{CommandType, CorrelationId, Outcome};

pub use loopback::LoopbackAgent;

/// 下发消息：`{ correlationId, agentId, command, commandType }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub correlation_id: CorrelationId,
    pub agent_id: String,
    pub command: String,
    pub command_type: CommandType,
}

/// 完成事件中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

/// 完成事件：`{ correlationId, status, output?, error? }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub correlation_id: CorrelationId,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionEvent {
    pub fn completed(id: CorrelationId, output: impl Into<String>) -> Self {
        Self {
            correlation_id: id,
            status: CompletionStatus::Completed,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id: id,
            status: CompletionStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    /// 转为引擎使用的 Outcome；缺失的文本字段按空串处理
    pub fn outcome(&self) -> Outcome {
        match self.status {
            CompletionStatus::Completed => Outcome::completed(self.output.clone().unwrap_or_default()),
            CompletionStatus::Failed => Outcome::failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "remote execution failed".to_string()),
            ),
        }
    }
}

/// Agent 确认开始执行：`{ correlationId }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub correlation_id: CorrelationId,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Acknowledged(Acknowledgement),
    Completion(CompletionEvent),
    AgentStatus(AgentStatusUpdate),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// 出站传输
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一条下发消息；同步失败（如连接未建立）直接返回错误
    async fn send(&self, message: DispatchMessage) -> Result<(), TransportError>;
}

/// 进程内传输：出站消息写入 mpsc，对端关闭后 send 返回 NotConnected
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: DispatchMessage) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::NotConnected)
    }
}
