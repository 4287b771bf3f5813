//! 指令生命周期引擎
//!
//! 注册表与历史日志是唯一的共享可变状态，统一放在一把 RwLock 里，只由 Dispatcher / Reconciler / TimeoutSupervisor 三方写入。
//! 每次状态迁移都在写锁内先做「仍在注册表中」检查，所以同一关联 ID 至多落一次终态；
//! 翻译与传输发送这两个挂起点不持有锁。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::dispatcher::DispatchPlan;
use super::history::{HistoryEntry, HistoryEvent, HistoryLog};
use super::id::CorrelationId;
use super::registry::CorrelationRegistry;
use super::timeout::TimeoutSupervisor;
use super::types::{CommandRecord, CommandStatus};
use crate::agent::AgentDirectory;
use crate::core::{CommandError, DispatchError, FailureKind, TranslationError};
use crate::relay::{RelayDiagnostic, RelayForwarder};
use crate::translate::{InputMode, ShellPassthrough, Translator};
use crate::transport::{InboundEvent, Transport};

/// 注册表 + 历史（同一把锁保护）
#[derive(Debug)]
pub(super) struct Ledger {
    pub(super) registry: CorrelationRegistry,
    pub(super) history: HistoryLog,
}

pub(super) struct EngineInner {
    pub(super) ledger: RwLock<Ledger>,
    pub(super) agents: Arc<AgentDirectory>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) translator: Arc<dyn Translator>,
    pub(super) shell: ShellPassthrough,
    pub(super) timeouts: TimeoutSupervisor,
    pub(super) relay: RelayForwarder,
    pub(super) events: broadcast::Sender<HistoryEvent>,
}

/// 构造引擎所需的协作方
pub struct EngineParts {
    pub agents: Arc<AgentDirectory>,
    pub transport: Arc<dyn Transport>,
    /// 自然语言翻译器
    pub translator: Arc<dyn Translator>,
    /// 原始 Shell 模式
    pub shell: ShellPassthrough,
    pub relay: RelayForwarder,
    /// None 表示历史不限容量
    pub history_capacity: Option<usize>,
}

/// 操作员输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorInput {
    pub text: String,
    pub mode: InputMode,
}

impl OperatorInput {
    pub fn shell(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: InputMode::Shell,
        }
    }

    pub fn natural(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: InputMode::NaturalLanguage,
        }
    }
}

/// 指令生命周期引擎（可廉价 Clone，各处共享同一份状态）
#[derive(Clone)]
pub struct CommandEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl CommandEngine {
    pub fn new(parts: EngineParts) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(EngineInner {
                ledger: RwLock::new(Ledger {
                    registry: CorrelationRegistry::new(),
                    history: HistoryLog::new(parts.history_capacity),
                }),
                agents: parts.agents,
                transport: parts.transport,
                translator: parts.translator,
                shell: parts.shell,
                timeouts: TimeoutSupervisor::new(),
                relay: parts.relay,
                events,
            }),
        }
    }

    /// 操作员提交：按模式翻译，成功后下发
    ///
    /// 翻译失败时历史中追加一条标记为 translation 的 Failed 条目，不会调用传输层。
    pub async fn submit(&self, agent_id: &str, input: OperatorInput) -> Result<CorrelationId, CommandError> {
        let agent = self
            .inner
            .agents
            .get(agent_id)
            .await
            .ok_or_else(|| CommandError::UnknownAgent(agent_id.to_string()))?;
        if !agent.is_online() {
            return Err(DispatchError::AgentOffline(agent_id.to_string()).into());
        }

        let context = agent.context();
        let translated = match input.mode {
            InputMode::Shell => self.inner.shell.translate(&input.text, &context).await,
            InputMode::NaturalLanguage => self.inner.translator.translate(&input.text, &context).await,
        };

        let translation = match translated {
            Ok(t) => t,
            Err(e) => {
                self.record_translation_failure(agent_id, &input.text, &e).await;
                return Err(e.into());
            }
        };

        let plan = DispatchPlan {
            agent_id: agent_id.to_string(),
            raw_input: input.text,
            resolved_command: translation.resolved_command,
            command_type: translation.command_type,
            timeout_ms: translation.suggested_timeout_ms,
            explanation: Some(translation.explanation),
            cause_id: None,
            retry_count: 0,
        };
        Ok(self.dispatch_plan(plan).await?)
    }

    /// 重新提交一条失败或超时的指令：新关联 ID，cause_id 指向原指令
    pub async fn retry(&self, id: &CorrelationId) -> Result<CorrelationId, CommandError> {
        let plan = {
            let ledger = self.inner.ledger.read().await;
            let entry = ledger
                .history
                .get(id)
                .ok_or_else(|| CommandError::UnknownCorrelation(id.clone()))?;

            let retryable = matches!(entry.status, CommandStatus::Failed | CommandStatus::TimedOut)
                && entry.failure != Some(FailureKind::Translation);
            let (Some(command), Some(command_type), true) =
                (entry.command.clone(), entry.command_type.clone(), retryable)
            else {
                return Err(CommandError::NotRetryable {
                    id: id.clone(),
                    status: entry.status,
                });
            };

            DispatchPlan {
                agent_id: entry.agent_id.clone(),
                raw_input: entry.raw_input.clone(),
                resolved_command: command,
                command_type,
                timeout_ms: entry.timeout_ms,
                explanation: entry.explanation.clone(),
                cause_id: Some(id.clone()),
                retry_count: entry.retry_count + 1,
            }
        };

        tracing::info!(cause_id = %id, retry_count = plan.retry_count, "retrying command");
        Ok(self.dispatch_plan(plan).await?)
    }

    /// 处理一条入站事件
    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Acknowledged(ack) => {
                self.acknowledge(&ack.correlation_id).await;
            }
            InboundEvent::Completion(completion) => {
                self.resolve(&completion.correlation_id, completion.outcome()).await;
            }
            InboundEvent::AgentStatus(update) => {
                self.apply_agent_status(update).await;
            }
        }
    }

    /// 事件循环：消费入站事件直到通道关闭或收到关闭信号，退出前解除全部计时器
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<InboundEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Command engine received shutdown signal");
                    break;
                }
                event = inbound.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!("Inbound channel closed, command engine stopping");
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// 解除全部计时器；在途记录保留在历史中
    pub async fn shutdown(&self) -> usize {
        let disarmed = self.inner.timeouts.disarm_all();
        let pending = self.pending_count().await;
        if pending > 0 {
            tracing::warn!("Shutting down with {} command(s) still in flight", pending);
        }
        disarmed
    }

    /// 历史快照（提交顺序）
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.ledger.read().await.history.list()
    }

    pub async fn entry(&self, id: &CorrelationId) -> Option<HistoryEntry> {
        self.inner.ledger.read().await.history.get(id).cloned()
    }

    /// 在途记录（终态记录只在历史中）
    pub async fn record(&self, id: &CorrelationId) -> Option<CommandRecord> {
        self.inner.ledger.read().await.registry.lookup(id).ok().cloned()
    }

    pub async fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.ledger.read().await.registry.contains(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.ledger.read().await.registry.len()
    }

    pub fn timer_armed(&self, id: &CorrelationId) -> bool {
        self.inner.timeouts.is_armed(id)
    }

    /// 订阅历史变更（UI 视图用）
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.inner.events.subscribe()
    }

    /// 订阅 Relay 转发失败诊断
    pub fn relay_diagnostics(&self) -> broadcast::Receiver<RelayDiagnostic> {
        self.inner.relay.diagnostics()
    }

    pub fn agents(&self) -> &Arc<AgentDirectory> {
        &self.inner.agents
    }

    async fn record_translation_failure(&self, agent_id: &str, raw_input: &str, error: &TranslationError) {
        tracing::warn!(agent_id, "Translation failed: {}", error);
        let entry =
            HistoryEntry::translation_failure(CorrelationId::mint(), agent_id, raw_input, error.to_string());
        let mut ledger = self.inner.ledger.write().await;
        self.append_history(&mut ledger, entry);
    }

    /// 追加历史并广播（含因容量被淘汰的条目）
    pub(super) fn append_history(&self, ledger: &mut Ledger, entry: HistoryEntry) {
        let evicted = ledger.history.append(entry.clone());
        let _ = self.inner.events.send(HistoryEvent::Appended(entry));
        for id in evicted {
            let _ = self.inner.events.send(HistoryEvent::Evicted(id));
        }
    }

    /// 用记录刷新对应历史条目（位置不变）并广播；落终态后补做容量淘汰
    pub(super) fn sync_history(&self, ledger: &mut Ledger, record: &CommandRecord) {
        if let Some(entry) = ledger.history.update_by_id(record.id(), |e| e.sync_from(record)) {
            let _ = self.inner.events.send(HistoryEvent::Updated(entry.clone()));
        }
        if record.is_terminal() {
            for id in ledger.history.evict_overflow() {
                let _ = self.inner.events.send(HistoryEvent::Evicted(id));
            }
        }
    }

    /// 终态记录转发到 Relay（在锁外调用）
    pub(super) async fn notify_relay(&self, record: &CommandRecord) {
        if !self.inner.relay.is_enabled() {
            return;
        }
        let name = self.inner.agents.display_name(&record.request.agent_id).await;
        self.inner.relay.notify(record, &name);
    }
}
