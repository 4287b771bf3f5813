//! 自然语言模式：交给 LLM 翻译成 Shell 指令
//!
//! 以 `$` 或 `!` 开头的输入视为字面 Shell，不调用 LLM（快速路径）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{AgentContext, TimeoutPolicy, TranslationRequest, TranslationResult, Translator};
use crate::agent::Platform;
use crate::command::CommandType;
use crate::core::TranslationError;
use crate::llm::{LlmClient, Message};

const SYSTEM_PROMPT: &str = r#"You translate an operator's request into ONE shell command for a remote agent.
The user message is JSON: {"rawInput": ..., "agentPlatform": ..., "agentSystemInfo": ...}.
Use PowerShell syntax for windows agents and POSIX shell for linux/macos agents.

Output ONLY a JSON object (no prose):
{"resolvedCommand": "<command>", "commandType": "bash|sh|powershell|cmd", "suggestedTimeoutMs": <integer, 0 if unsure>, "explanation": "<one sentence>"}"#;

/// LLM 回复的宽松形态，字段缺失时再判错
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranslation {
    resolved_command: Option<String>,
    command_type: Option<String>,
    suggested_timeout_ms: Option<u64>,
    explanation: Option<String>,
}

pub struct LlmTranslator {
    llm: Arc<dyn LlmClient>,
    policy: TimeoutPolicy,
    /// 单次远程调用超时
    request_timeout: Duration,
    /// 启用 `$` / `!` 快速路径
    enable_fast_path: bool,
}

impl LlmTranslator {
    pub fn new(llm: Arc<dyn LlmClient>, policy: TimeoutPolicy) -> Self {
        Self {
            llm,
            policy,
            request_timeout: Duration::from_secs(30),
            enable_fast_path: true,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.enable_fast_path = enabled;
        self
    }

    fn fast_path(&self, input: &str, context: &AgentContext) -> Option<TranslationResult> {
        let literal = input
            .strip_prefix('$')
            .or_else(|| input.strip_prefix('!'))?
            .trim();
        if literal.is_empty() {
            return None;
        }
        Some(TranslationResult {
            resolved_command: literal.to_string(),
            command_type: context.default_command_type(),
            suggested_timeout_ms: self.policy.suggest(literal),
            explanation: "literal shell input".to_string(),
        })
    }

    fn parse(&self, reply: &str, context: &AgentContext) -> Result<TranslationResult, TranslationError> {
        let json = extract_json_object(reply)
            .ok_or_else(|| TranslationError::Malformed(truncate(reply, 120)))?;
        let raw: RawTranslation =
            serde_json::from_str(json).map_err(|e| TranslationError::Malformed(e.to_string()))?;

        let command = raw
            .resolved_command
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TranslationError::Malformed("missing resolvedCommand".to_string()))?;

        let command_type = raw
            .command_type
            .filter(|t| !t.trim().is_empty())
            .map(CommandType::from)
            .unwrap_or_else(|| context.default_command_type());

        let timeout_ms = self
            .policy
            .resolve(&command, raw.suggested_timeout_ms.unwrap_or(0));

        Ok(TranslationResult {
            resolved_command: command,
            command_type,
            suggested_timeout_ms: timeout_ms,
            explanation: raw.explanation.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        raw_input: &str,
        context: &AgentContext,
    ) -> Result<TranslationResult, TranslationError> {
        let input = raw_input.trim();
        if input.is_empty() {
            return Err(TranslationError::EmptyInput);
        }

        if self.enable_fast_path {
            if let Some(result) = self.fast_path(input, context) {
                return Ok(result);
            }
        }

        if context.platform == Platform::Unknown {
            return Err(TranslationError::MissingPlatform);
        }

        let request = TranslationRequest {
            raw_input: input.to_string(),
            agent_platform: context.platform,
            agent_system_info: context.system_info.clone(),
        };
        let payload = serde_json::to_string(&request)
            .map_err(|e| TranslationError::Backend(e.to_string()))?;
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(payload)];

        let reply = tokio::time::timeout(self.request_timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| {
                TranslationError::Backend(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(TranslationError::Backend)?;

        let result = self.parse(&reply, context)?;
        tracing::debug!(
            agent_id = %context.agent_id,
            command = %result.resolved_command,
            "translated operator input"
        );
        Ok(result)
    }
}

/// 取回复中的 JSON 对象（兼容 ```json 代码块与前后多余文字）
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
