//! 远程 Agent 目录
//!
//! Agent 对本子系统只读，唯一可变的是在线状态：离线的 Agent 不允许下发，
//! 由在线转离线会触发该 Agent 全部在途指令的批量取消（见 CommandEngine::apply_agent_status）。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::translate::AgentContext;

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

/// Agent 运行平台（决定默认 Shell 家族）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
    Unknown,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Macos => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
            Platform::Unknown => write!(f, "unknown"),
        }
    }
}

/// 远程 Agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub status: AgentStatus,
    pub platform: Platform,
    /// 系统信息摘要（发行版、Shell 等），供翻译参考
    pub system_info: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: AgentStatus::Online,
            platform,
            system_info: None,
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_system_info(mut self, info: impl Into<String>) -> Self {
        self.system_info = Some(info.into());
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }

    pub fn context(&self) -> AgentContext {
        AgentContext {
            agent_id: self.id.clone(),
            platform: self.platform,
            system_info: self.system_info.clone(),
        }
    }
}

/// 状态推送：`{ agentId, status }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusUpdate {
    pub agent_id: String,
    pub status: AgentStatus,
}

/// Agent 目录
#[derive(Debug, Default)]
pub struct AgentDirectory {
    agents: RwLock<HashMap<String, Agent>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// 更新在线状态，返回更新前的状态（未知 Agent 返回 None）
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Option<AgentStatus> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(agent_id)?;
        let previous = agent.status;
        agent.status = status;
        Some(previous)
    }

    /// 翻译上下文；未知 Agent 返回 None
    pub async fn context_for(&self, agent_id: &str) -> Option<AgentContext> {
        self.agents.read().await.get(agent_id).map(Agent::context)
    }

    /// 按 ID 排序的全部 Agent
    pub async fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// 显示名，未知时退回 ID
    pub async fn display_name(&self, agent_id: &str) -> String {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|a| a.display_name.clone())
            .unwrap_or_else(|| agent_id.to_string())
    }
}
