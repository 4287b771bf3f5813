//! 优雅关闭
//!
//! 控制台退出、Ctrl+C、SIGTERM 三个入口共用一个 CancellationToken；
//! 第一个触发者的原因会被记下。关闭后按注册顺序跑清理钩子，每个钩子有时间预算。
//! 引擎钩子只解除超时计时器，在途指令留在本次会话的历史里。

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::command::CommandEngine;

/// 单个清理钩子的默认时间预算
const CLEANUP_BUDGET: Duration = Duration::from_secs(5);

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 操作员在控制台输入 :quit 或 stdin 关闭
    Operator,
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::Operator => "operator",
            ShutdownReason::Interrupt => "interrupt",
            ShutdownReason::Terminate => "terminate",
        };
        f.write_str(text)
    }
}

/// 关闭信号：一次性触发，记录首个原因
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给后台任务的取消 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；已触发过时只返回 false，原因保持为第一次的
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            tracing::info!(%reason, "Shutdown requested");
        }
        self.token.cancel();
        first
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM（非 unix 只有 Ctrl+C）；关闭后监听任务随之退出
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = manager.token.cancelled() => return,
                r = tokio::signal::ctrl_c() => match r {
                    Ok(()) => ShutdownReason::Interrupt,
                    Err(e) => {
                        tracing::warn!("Ctrl+C handler unavailable: {}", e);
                        return;
                    }
                },
                _ = terminate_signal() => ShutdownReason::Terminate,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

/// 关闭时执行的清理钩子
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志里的钩子名
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理钩子
pub struct ShutdownCoordinator {
    hooks: Vec<Box<dyn ShutdownCleanup>>,
    budget: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            budget: CLEANUP_BUDGET,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, hook: T) {
        self.hooks.push(Box::new(hook));
    }

    /// 依次执行；单个钩子失败或超出预算只记日志，不影响后续钩子。返回成功的钩子数
    pub async fn run_cleanup(&self) -> usize {
        let mut succeeded = 0;
        for hook in &self.hooks {
            match tokio::time::timeout(self.budget, hook.cleanup()).await {
                Ok(Ok(())) => {
                    succeeded += 1;
                    tracing::debug!(hook = hook.name(), "cleanup done");
                }
                Ok(Err(e)) => tracing::warn!(hook = hook.name(), "Cleanup failed: {}", e),
                Err(_) => tracing::warn!(
                    hook = hook.name(),
                    "Cleanup exceeded {}ms budget",
                    self.budget.as_millis()
                ),
            }
        }
        succeeded
    }
}

/// 引擎钩子：解除全部超时计时器
pub struct EngineCleanup {
    engine: CommandEngine,
}

impl EngineCleanup {
    pub fn new(engine: CommandEngine) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for EngineCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let disarmed = self.engine.shutdown().await;
        tracing::debug!("Disarmed {} timeout(s)", disarmed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command-engine"
    }
}
