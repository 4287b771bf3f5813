//! Hive - 远程 Agent 指令调度与对账
//!
//! 模块划分：
//! - **agent**: 远程 Agent 目录与在线状态
//! - **command**: 关联 ID、在途注册表、超时监管、历史日志、CommandEngine
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、引擎构建器、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **relay**: 终态结果外发（Webhook）
//! - **translate**: 自然语言 / Shell 输入到可执行指令的翻译
//! - **transport**: 下发与回执的消息边界

pub mod agent;
pub mod command;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod relay;
pub mod translate;
pub mod transport;
