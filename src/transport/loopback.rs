//! 本机回环 Agent：消费 ChannelTransport 的出站消息并模拟回报
//!
//! 不执行任何进程。先回 Acknowledgement，经过一段模拟延迟后按指令文本生成 CompletionEvent：
//! `echo` 回显参数，`whoami` 返回配置的用户名，`sleep N` 延迟 N 秒（可用来观察超时），
//! `exit N` / `false` 失败，其余指令成功并回显。
//! 只处理发给自身 agent_id 的消息，其余忽略（由超时兜底）。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Acknowledgement, CompletionEvent, DispatchMessage, InboundEvent};

/// 模拟的执行结果（尚未绑定关联 ID）
#[derive(Debug, Clone, PartialEq, Eq)]
enum Simulated {
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LoopbackAgent {
    agent_id: String,
    user: String,
    /// 每条指令的基础延迟
    latency: Duration,
}

impl LoopbackAgent {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user: "operator".to_string(),
            latency: Duration::from_millis(50),
        }
    }

    /// `whoami` 的回答
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 主循环：直到出站通道关闭或收到关闭信号
    pub async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<DispatchMessage>,
        inbound: mpsc::UnboundedSender<InboundEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(m) => m,
                    None => break,
                },
            };

            if message.agent_id != self.agent_id {
                tracing::debug!(agent_id = %message.agent_id, "loopback ignoring message for other agent");
                continue;
            }

            let ack = InboundEvent::Acknowledged(Acknowledgement {
                correlation_id: message.correlation_id.clone(),
            });
            if inbound.send(ack).is_err() {
                break;
            }

            let agent = self.clone();
            let inbound = inbound.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    event = agent.execute(&message) => {
                        let _ = inbound.send(InboundEvent::Completion(event));
                    }
                }
            });
        }
        tracing::debug!(agent_id = %self.agent_id, "loopback agent stopped");
    }

    /// 模拟执行一条下发消息并生成完成事件
    pub async fn execute(&self, message: &DispatchMessage) -> CompletionEvent {
        let (delay, result) = self.simulate(&message.command);
        tokio::time::sleep(self.latency + delay).await;

        let id = message.correlation_id.clone();
        match result {
            Simulated::Completed(output) => CompletionEvent::completed(id, output),
            Simulated::Failed(error) => CompletionEvent::failed(id, error),
        }
    }

    fn simulate(&self, command: &str) -> (Duration, Simulated) {
        let command = command.trim();
        let (program, args) = match command.split_once(char::is_whitespace) {
            Some((program, args)) => (program, args.trim()),
            None => (command, ""),
        };

        match program {
            "echo" => (Duration::ZERO, Simulated::Completed(format!("{}\n", args))),
            "whoami" => (Duration::ZERO, Simulated::Completed(format!("{}\n", self.user))),
            "true" => (Duration::ZERO, Simulated::Completed(String::new())),
            "false" => (Duration::ZERO, Simulated::Failed("exit 1".to_string())),
            "exit" => match args.parse::<i32>() {
                Ok(0) => (Duration::ZERO, Simulated::Completed(String::new())),
                Ok(code) => (Duration::ZERO, Simulated::Failed(format!("exit {}", code))),
                Err(_) => (Duration::ZERO, Simulated::Failed(format!("exit: bad code '{}'", args))),
            },
            "sleep" => {
                let delay = args.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok());
                match delay {
                    Some(delay) => (delay, Simulated::Completed(String::new())),
                    None => (Duration::ZERO, Simulated::Failed(format!("sleep: invalid time '{}'", args))),
                }
            }
            _ => (Duration::ZERO, Simulated::Completed(format!("[simulated] {}\n", command))),
        }
    }
}
