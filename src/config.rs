//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RELAY__ENABLED=true`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::relay::RelayConfig;
use crate::translate::{TimeoutPolicy, TimeoutRule};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub dispatch: DispatchSection,
    pub translation: TranslationSection,
    pub relay: RelayConfig,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [dispatch] 段：超时边界与历史容量
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    /// 无规则命中时的超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// 历史条目上限；0 表示不限
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_min_timeout_ms() -> u64 {
    1_000
}

fn default_max_timeout_ms() -> u64 {
    600_000
}

fn default_history_capacity() -> usize {
    500
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl DispatchSection {
    pub fn history_capacity(&self) -> Option<usize> {
        (self.history_capacity > 0).then_some(self.history_capacity)
    }
}

/// [translation] 段：LLM 后端与超时启发规则
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationSection {
    /// 后端：mock / deepseek / openai；是否真正启用还取决于环境变量中的 API Key
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次翻译请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `$` / `!` 开头的输入直接当 Shell
    #[serde(default = "default_fast_path")]
    pub fast_path: bool,
    /// 按指令文本匹配的超时规则，按顺序第一条命中生效
    #[serde(default = "crate::translate::default_timeout_rules")]
    pub timeout_rules: Vec<TimeoutRule>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fast_path() -> bool {
    true
}

impl Default for TranslationSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            fast_path: default_fast_path(),
            timeout_rules: crate::translate::default_timeout_rules(),
        }
    }
}

impl AppConfig {
    /// 由 [dispatch] 边界与 [translation] 规则构造超时策略
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(
            &self.translation.timeout_rules,
            self.dispatch.default_timeout_ms,
            self.dispatch.min_timeout_ms,
            self.dispatch.max_timeout_ms,
        )
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
