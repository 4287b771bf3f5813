//! 翻译适配器：把操作员输入转成结构化指令
//!
//! - **ShellPassthrough**：原始 Shell 模式，指令原样下发，只补类型与超时
//! - **LlmTranslator**：自然语言模式，交给 LLM 产出 `{ resolvedCommand, commandType, suggestedTimeoutMs, explanation }`
//!
//! 翻译是 (输入, Agent 上下文) 的纯函数，除远程调用外无副作用，不碰注册表与历史。

mod llm;
mod passthrough;
mod policy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::Platform;
use crate::command::CommandType;
use crate::core::TranslationError;

pub use llm::LlmTranslator;
pub use passthrough::ShellPassthrough;
pub use policy::{default_rules as default_timeout_rules, TimeoutPolicy, TimeoutRule};

/// 翻译所需的 Agent 上下文（至少带平台提示）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentContext {
    pub agent_id: String,
    pub platform: Platform,
    pub system_info: Option<String>,
}

impl AgentContext {
    /// 平台对应的默认 Shell 家族
    pub fn default_command_type(&self) -> CommandType {
        match self.platform {
            Platform::Windows => CommandType::PowerShell,
            _ => CommandType::Bash,
        }
    }
}

/// 发往 AI 协作方的翻译请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub raw_input: String,
    pub agent_platform: Platform,
    pub agent_system_info: Option<String>,
}

/// 翻译结果，用一次即弃
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub resolved_command: String,
    pub command_type: CommandType,
    pub suggested_timeout_ms: u64,
    #[serde(default)]
    pub explanation: String,
}

/// 输入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// 原始 Shell 文本
    Shell,
    /// 自然语言，需要翻译
    NaturalLanguage,
}

/// 翻译器 trait
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        raw_input: &str,
        context: &AgentContext,
    ) -> Result<TranslationResult, TranslationError>;
}
