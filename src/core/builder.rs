//! 引擎构建器：统一的 CommandEngine 初始化逻辑
//!
//! 控制台与测试共用同一套装配：翻译器、Relay、Agent 目录都可替换，其余取自配置。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, AgentDirectory};
use crate::command::{CommandEngine, EngineParts};
use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::relay::{RelayForwarder, RelaySink};
use crate::translate::{LlmTranslator, ShellPassthrough, Translator};
use crate::transport::Transport;

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    agents: Arc<AgentDirectory>,
    seed_agents: Vec<Agent>,
    translator: Option<Arc<dyn Translator>>,
    llm: Option<Arc<dyn LlmClient>>,
    relay: Option<RelayForwarder>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            agents: Arc::new(AgentDirectory::new()),
            seed_agents: Vec::new(),
            translator: None,
            llm: None,
            relay: None,
        }
    }

    /// 共享外部的 Agent 目录
    pub fn with_directory(mut self, agents: Arc<AgentDirectory>) -> Self {
        self.agents = agents;
        self
    }

    /// 构建时登记的 Agent
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.seed_agents.push(agent);
        self
    }

    /// 替换自然语言翻译器（默认按配置创建 LlmTranslator）
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// 替换 LLM 后端，仍使用 LlmTranslator
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换 Relay 投递端
    pub fn with_relay_sink(mut self, sink: Arc<dyn RelaySink>) -> Self {
        self.relay = Some(RelayForwarder::with_sink(sink, self.config.relay.max_output_chars));
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch.history_capacity = capacity;
        self
    }

    /// 构建翻译器
    pub fn build_translator(&self) -> Arc<dyn Translator> {
        if let Some(translator) = &self.translator {
            return Arc::clone(translator);
        }
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| crate::llm::create_llm_from_config(&self.config.translation));
        let section = &self.config.translation;
        Arc::new(
            LlmTranslator::new(llm, self.config.timeout_policy())
                .with_request_timeout(Duration::from_secs(section.request_timeout_secs))
                .with_fast_path(section.fast_path),
        )
    }

    /// 构建引擎并登记预置 Agent
    pub async fn build(self) -> CommandEngine {
        let translator = self.build_translator();
        let relay = self
            .relay
            .unwrap_or_else(|| RelayForwarder::from_config(&self.config.relay));

        for agent in self.seed_agents {
            self.agents.upsert(agent).await;
        }

        tracing::info!(
            relay = relay.is_enabled(),
            provider = %self.config.translation.provider,
            "Command engine initialized"
        );

        CommandEngine::new(EngineParts {
            agents: self.agents,
            transport: self.transport,
            translator,
            shell: ShellPassthrough::new(self.config.timeout_policy()),
            relay,
            history_capacity: self.config.dispatch.history_capacity(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// 便捷函数：从默认路径加载配置并创建 EngineBuilder
pub fn create_engine_builder(config_path: Option<PathBuf>, transport: Arc<dyn Transport>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    EngineBuilder::new(config, transport)
}
