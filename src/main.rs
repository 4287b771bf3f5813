//! Hive - 远程 Agent 指令控制台
//!
//! 入口：初始化日志与引擎，挂上模拟回报的本机回环 Agent，逐行读取操作员输入。
//! `$ cmd` / `! cmd` 按 Shell 原样下发，其余走自然语言翻译；`:help` 查看控制命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::agent::{Agent, AgentStatus, AgentStatusUpdate, Platform};
use hive::command::{CommandEngine, CorrelationId, HistoryEvent, OperatorInput};
use hive::core::{
    create_engine_builder, EngineCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use hive::transport::{ChannelTransport, InboundEvent, LoopbackAgent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const LOCAL_AGENT: &str = "local";

const HELP: &str = "\
  <text>            translate natural language and dispatch
  $ <cmd> | ! <cmd> dispatch literal shell
  :history          list history
  :cancel <id>      cancel an in-flight command
  :retry <id>       resubmit a failed or timed-out command
  :offline | :online  simulate agent status change
  :quit             exit";

fn local_platform() -> Platform {
    if cfg!(target_os = "windows") {
        Platform::Windows
    } else if cfg!(target_os = "macos") {
        Platform::Macos
    } else {
        Platform::Linux
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let (transport, outbound) = ChannelTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let local = Agent::new(LOCAL_AGENT, "this host", local_platform())
        .with_system_info(format!("{} {}", std::env::consts::OS, std::env::consts::ARCH));
    let engine = create_engine_builder(config_path, Arc::new(transport))
        .with_agent(local)
        .build()
        .await;

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();

    let engine_task = {
        let engine = engine.clone();
        let token = manager.token();
        tokio::spawn(async move { engine.run(inbound_rx, token).await })
    };
    let user = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());
    let loopback = LoopbackAgent::new(LOCAL_AGENT).with_user(user);
    tokio::spawn(loopback.run(outbound, inbound_tx.clone(), manager.token()));
    tokio::spawn(print_history(engine.clone()));

    println!("hive console, agent '{}'. Type :help for commands.", LOCAL_AGENT);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = manager.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !handle_line(&engine, &inbound_tx, line).await {
            break;
        }
    }

    manager.shutdown(ShutdownReason::Operator);
    if let Some(reason) = manager.reason() {
        println!("shutting down ({})", reason);
    }
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(EngineCleanup::new(engine));
    coordinator.run_cleanup().await;
    engine_task.await.context("Engine task panicked")?;
    Ok(())
}

/// 处理一行输入；返回 false 表示退出
async fn handle_line(
    engine: &CommandEngine,
    inbound: &mpsc::UnboundedSender<InboundEvent>,
    line: &str,
) -> bool {
    let mut parts = line.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match head {
        ":quit" | ":exit" => return false,
        ":help" => println!("{}", HELP),
        ":history" => {
            for entry in engine.history().await {
                println!("{}  {}", entry.id, entry.display_line());
            }
        }
        ":cancel" => {
            let outcome = engine.cancel(&CorrelationId::from(arg)).await;
            println!("cancel {}: {:?}", arg, outcome);
        }
        ":retry" => match engine.retry(&CorrelationId::from(arg)).await {
            Ok(id) => println!("retry dispatched as {}", id),
            Err(e) => println!("retry failed: {}", e),
        },
        ":offline" | ":online" => {
            let status = if head == ":offline" {
                AgentStatus::Offline
            } else {
                AgentStatus::Online
            };
            let update = AgentStatusUpdate {
                agent_id: LOCAL_AGENT.to_string(),
                status,
            };
            let _ = inbound.send(InboundEvent::AgentStatus(update));
        }
        _ => {
            let input = match line.strip_prefix('$').or_else(|| line.strip_prefix('!')) {
                Some(literal) => OperatorInput::shell(literal),
                None => OperatorInput::natural(line),
            };
            if let Err(e) = engine.submit(LOCAL_AGENT, input).await {
                println!("error: {}", e);
            }
        }
    }
    true
}

/// 历史视图：作为纯订阅者打印变更
async fn print_history(engine: CommandEngine) {
    let mut events = engine.subscribe();
    loop {
        match events.recv().await {
            Ok(HistoryEvent::Appended(entry)) | Ok(HistoryEvent::Updated(entry)) => {
                println!("{}  {}", entry.id, entry.display_line());
            }
            Ok(HistoryEvent::Evicted(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("History view lagged by {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
