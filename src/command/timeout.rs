//! 超时监管：每个在途指令一个截止时间
//!
//! 单个计时器的状态：Armed → {Disarmed（正常回执）| Expired（触发）}。
//! disarm 幂等，对已触发或已解除的计时器调用是空操作。
//! 触发后是否真的落 TimedOut 由回调方在注册表上做非终态检查决定，保证终态至多迁移一次。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::id::CorrelationId;

/// 已布防的计时器；generation 区分同一 id 上先后两次 arm
#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    token: CancellationToken,
}

/// 超时监管器
#[derive(Debug, Clone, Default)]
pub struct TimeoutSupervisor {
    armed: Arc<Mutex<HashMap<CorrelationId, ArmedTimer>>>,
    generation: Arc<AtomicU64>,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<CorrelationId, ArmedTimer>> {
        lock_timers(&self.armed)
    }

    /// 为 id 设定截止时间；到期时执行 on_expire。已有计时器会被替换。
    pub fn arm<F>(&self, id: CorrelationId, deadline: Instant, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let timer = ArmedTimer {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.timers().insert(id.clone(), timer) {
            previous.token.cancel();
        }

        let armed = Arc::clone(&self.armed);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let expired = {
                        let mut timers = lock_timers(&armed);
                        match timers.get(&id) {
                            Some(current) if current.generation == generation => {
                                timers.remove(&id);
                                true
                            }
                            _ => false,
                        }
                    };
                    if expired {
                        tracing::debug!(correlation_id = %id, "timeout fired");
                        on_expire.await;
                    }
                }
            }
        });
    }

    /// 解除计时器；返回是否确有计时器被解除
    pub fn disarm(&self, id: &CorrelationId) -> bool {
        match self.timers().remove(id) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 关闭时解除全部计时器
    pub fn disarm_all(&self) -> usize {
        let mut timers = self.timers();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.token.cancel();
        }
        count
    }

    pub fn is_armed(&self, id: &CorrelationId) -> bool {
        self.timers().contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers().len()
    }
}

fn lock_timers(
    armed: &Mutex<HashMap<CorrelationId, ArmedTimer>>,
) -> MutexGuard<'_, HashMap<CorrelationId, ArmedTimer>> {
    armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
