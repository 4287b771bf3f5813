//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 取最后一条 User 消息里的 rawInput，按少量关键词回一段翻译 JSON；
//! 认不出来时原样当作 Shell 指令返回。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn translate(raw: &str, platform: &str) -> (String, String) {
        let lower = raw.to_lowercase();
        let windows = platform == "windows";
        let command = if lower.contains("who am i") || lower.contains("current user") {
            "whoami"
        } else if lower.contains("disk") {
            if windows { "Get-PSDrive -PSProvider FileSystem" } else { "df -h" }
        } else if lower.contains("memory") {
            if windows { "Get-CimInstance Win32_OperatingSystem" } else { "free -m" }
        } else if lower.contains("process") {
            if windows { "Get-Process" } else { "ps aux" }
        } else {
            raw.trim()
        };
        let command_type = if windows { "powershell" } else { "bash" };
        (command.to_string(), command_type.to_string())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| "no user message".to_string())?;

        let request: serde_json::Value =
            serde_json::from_str(last_user).map_err(|e| e.to_string())?;
        let raw = request["rawInput"].as_str().unwrap_or_default();
        let platform = request["agentPlatform"].as_str().unwrap_or("linux");

        let (command, command_type) = Self::translate(raw, platform);
        Ok(serde_json::json!({
            "resolvedCommand": command,
            "commandType": command_type,
            "suggestedTimeoutMs": 0,
            "explanation": format!("Mock translation of: {}", raw),
        })
        .to_string())
    }
}
