//! 超时策略：按指令文本的关键词推荐超时
//!
//! 规则按顺序匹配（忽略大小写），第一条命中即用；都不命中用默认值。
//! 翻译器给出的建议值最终都会被夹到 [min_ms, max_ms]。

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// 一条规则：正则 → 超时（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutRule {
    pub pattern: String,
    pub timeout_ms: u64,
}

impl TimeoutRule {
    pub fn new(pattern: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            pattern: pattern.into(),
            timeout_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    rules: Vec<(Regex, u64)>,
    default_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl TimeoutPolicy {
    /// 编译规则；非法正则跳过并告警
    pub fn new(rules: &[TimeoutRule], default_ms: u64, min_ms: u64, max_ms: u64) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| {
                match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                    Ok(re) => Some((re, rule.timeout_ms)),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid timeout rule '{}': {}", rule.pattern, e);
                        None
                    }
                }
            })
            .collect();

        let min_ms = min_ms.max(1);
        let max_ms = max_ms.max(min_ms);
        Self {
            rules: compiled,
            default_ms: default_ms.clamp(min_ms, max_ms),
            min_ms,
            max_ms,
        }
    }

    /// 按指令文本推荐超时
    pub fn suggest(&self, command: &str) -> u64 {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(command))
            .map(|(_, ms)| *ms)
            .unwrap_or(self.default_ms)
            .clamp(self.min_ms, self.max_ms)
    }

    /// 处理翻译器给的建议值：0 视为未给出，改用规则
    pub fn resolve(&self, command: &str, suggested_ms: u64) -> u64 {
        if suggested_ms == 0 {
            self.suggest(command)
        } else {
            suggested_ms.clamp(self.min_ms, self.max_ms)
        }
    }

    pub fn default_ms(&self) -> u64 {
        self.default_ms
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(&default_rules(), 30_000, 1_000, 600_000)
    }
}

/// 默认规则：下载类 2 分钟，安装/构建类 5 分钟
pub fn default_rules() -> Vec<TimeoutRule> {
    vec![
        TimeoutRule::new(r"\b(download|curl|wget|scp|rsync)\b", 120_000),
        TimeoutRule::new(r"\b(install|apt|apt-get|yum|dnf|brew|pip|npm|cargo|choco|winget)\b", 300_000),
    ]
}
