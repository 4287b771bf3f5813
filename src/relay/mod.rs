//! Relay 转发：终态指令镜像到第二通道（如通知群）
//!
//! 尽力而为、发出即忘：转发在独立任务里执行，失败只记日志并推到诊断通道，
//! 永远不会回写或影响 CommandRecord。

mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::command::{CommandRecord, CommandStatus, CorrelationId};

pub use webhook::WebhookRelay;

/// [relay] 配置：构造时显式传入
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: Option<String>,
    /// Bearer 凭据
    pub credentials: Option<String>,
    #[serde(default = "default_relay_timeout_secs")]
    pub timeout_secs: u64,
    /// 输出过长时截断（字符数）
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_relay_timeout_secs() -> u64 {
    10
}

fn default_max_output_chars() -> usize {
    4000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            credentials: None,
            timeout_secs: default_relay_timeout_secs(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

/// 转发消息：`{ agentName, command, status, output?, error?, timestamp }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub agent_name: String,
    pub command: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339
    pub timestamp: String,
}

impl RelayMessage {
    pub fn from_record(record: &CommandRecord, agent_name: &str, max_output_chars: usize) -> Self {
        let timestamp = record
            .completed_at
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now)
            .to_rfc3339();
        Self {
            agent_name: agent_name.to_string(),
            command: record.request.resolved_command.clone(),
            status: record.status,
            output: record.output.as_deref().map(|o| truncate_chars(o, max_output_chars)),
            error: record.error.clone(),
            timestamp,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("\n…(truncated)");
    out
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("relay rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// 转发失败的诊断信息（独立于指令记录）
#[derive(Debug, Clone)]
pub struct RelayDiagnostic {
    pub correlation_id: CorrelationId,
    pub error: String,
}

/// 第二通道
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn deliver(&self, message: &RelayMessage) -> Result<(), RelayError>;
}

/// Relay 转发器
#[derive(Clone)]
pub struct RelayForwarder {
    sink: Option<Arc<dyn RelaySink>>,
    max_output_chars: usize,
    diagnostics: broadcast::Sender<RelayDiagnostic>,
}

impl RelayForwarder {
    /// 未启用时的空转发器
    pub fn disabled() -> Self {
        let (diagnostics, _) = broadcast::channel(64);
        Self {
            sink: None,
            max_output_chars: default_max_output_chars(),
            diagnostics,
        }
    }

    /// 按配置构造：enabled 且配置了 endpoint 时使用 Webhook
    pub fn from_config(config: &RelayConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match WebhookRelay::from_config(config) {
            Some(webhook) => Self::with_sink(Arc::new(webhook), config.max_output_chars),
            None => {
                tracing::warn!("Relay enabled but no endpoint configured, relay disabled");
                Self::disabled()
            }
        }
    }

    pub fn with_sink(sink: Arc<dyn RelaySink>, max_output_chars: usize) -> Self {
        let (diagnostics, _) = broadcast::channel(64);
        Self {
            sink: Some(sink),
            max_output_chars,
            diagnostics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// 订阅转发失败诊断
    pub fn diagnostics(&self) -> broadcast::Receiver<RelayDiagnostic> {
        self.diagnostics.subscribe()
    }

    /// 通知一个终态记录；立即返回
    pub fn notify(&self, record: &CommandRecord, agent_name: &str) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        if !record.is_terminal() {
            return;
        }

        let message = RelayMessage::from_record(record, agent_name, self.max_output_chars);
        let correlation_id = record.id().clone();
        let diagnostics = self.diagnostics.clone();

        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&message).await {
                tracing::warn!(correlation_id = %correlation_id, "Relay delivery failed: {}", e);
                let _ = diagnostics.send(RelayDiagnostic {
                    correlation_id,
                    error: e.to_string(),
                });
            }
        });
    }
}

impl Default for RelayForwarder {
    fn default() -> Self {
        Self::disabled()
    }
}
