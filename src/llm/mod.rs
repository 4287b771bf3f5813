//! LLM 层：翻译适配器背后的模型客户端（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, Message, Role};

use crate::config::TranslationSection;

/// 按 [translation] 配置与环境变量中的 API Key 选择后端；都没有时退回 Mock
pub fn create_llm_from_config(cfg: &TranslationSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider == "openai";

    if provider == "mock" {
        tracing::info!("Using Mock LLM for translation");
        Arc::new(MockLlmClient)
    } else if use_deepseek {
        let model = cfg.model.clone().unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({}) for translation", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({}) for translation", model);
        Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM for translation");
        Arc::new(MockLlmClient)
    }
}
