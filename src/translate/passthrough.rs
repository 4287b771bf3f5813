//! 原始 Shell 模式：不调用任何远程服务

use async_trait::async_trait;

use super::{AgentContext, TimeoutPolicy, TranslationResult, Translator};
use crate::core::TranslationError;

#[derive(Debug, Clone, Default)]
pub struct ShellPassthrough {
    policy: TimeoutPolicy,
}

impl ShellPassthrough {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Translator for ShellPassthrough {
    async fn translate(
        &self,
        raw_input: &str,
        context: &AgentContext,
    ) -> Result<TranslationResult, TranslationError> {
        let command = raw_input.trim();
        if command.is_empty() {
            return Err(TranslationError::EmptyInput);
        }

        Ok(TranslationResult {
            resolved_command: command.to_string(),
            command_type: context.default_command_type(),
            suggested_timeout_ms: self.policy.suggest(command),
            explanation: String::new(),
        })
    }
}
