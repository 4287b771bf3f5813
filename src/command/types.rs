//! 指令请求与生命周期记录
//!
//! 状态机：Pending → Executing → {Completed | Failed | TimedOut}，只进不退，终态不可再迁移。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::id::CorrelationId;
use crate::core::{CommandError, FailureKind};

/// 指令状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// 已下发，等待 Agent 确认
    Pending,
    /// Agent 已确认开始执行
    Executing,
    /// 执行成功
    Completed,
    /// 执行失败（原因见 FailureKind）
    Failed,
    /// 截止时间内无回执
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::TimedOut
        )
    }

    fn rank(self) -> u8 {
        match self {
            CommandStatus::Pending => 0,
            CommandStatus::Executing => 1,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::TimedOut => 2,
        }
    }

    /// 是否允许从 self 迁移到 next
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// 历史视图中的状态徽标
    pub fn badge(self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Executing => "RUNNING",
            CommandStatus::Completed => "OK",
            CommandStatus::Failed => "FAILED",
            CommandStatus::TimedOut => "TIMEOUT",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Pending => write!(f, "pending"),
            CommandStatus::Executing => write!(f, "executing"),
            CommandStatus::Completed => write!(f, "completed"),
            CommandStatus::Failed => write!(f, "failed"),
            CommandStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// 指令类型（Shell 家族等），线上以字符串传输
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandType {
    Bash,
    Sh,
    PowerShell,
    Cmd,
    Other(String),
}

impl From<String> for CommandType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "bash" | "shell" => CommandType::Bash,
            "sh" => CommandType::Sh,
            "powershell" | "pwsh" => CommandType::PowerShell,
            "cmd" => CommandType::Cmd,
            _ => CommandType::Other(s.trim().to_string()),
        }
    }
}

impl From<&str> for CommandType {
    fn from(s: &str) -> Self {
        CommandType::from(s.to_string())
    }
}

impl From<CommandType> for String {
    fn from(t: CommandType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Bash => write!(f, "bash"),
            CommandType::Sh => write!(f, "sh"),
            CommandType::PowerShell => write!(f, "powershell"),
            CommandType::Cmd => write!(f, "cmd"),
            CommandType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 指令请求：下发时创建，之后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub correlation_id: CorrelationId,
    pub agent_id: String,
    /// 操作员原始输入
    pub raw_input: String,
    /// 实际下发的指令
    pub resolved_command: String,
    pub command_type: CommandType,
    pub timeout_ms: u64,
    /// 提交时间（毫秒时间戳）
    pub submitted_at: i64,
    /// 重试时指向原指令
    pub cause_id: Option<CorrelationId>,
    pub retry_count: u32,
}

/// Agent 回报的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { output: String },
    Failed { error: String },
}

impl Outcome {
    pub fn completed(output: impl Into<String>) -> Self {
        Outcome::Completed {
            output: output.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            error: error.into(),
        }
    }
}

/// 可变的生命周期记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub request: CommandRequest,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub completed_at: Option<i64>,
}

impl CommandRecord {
    pub fn new(request: CommandRequest) -> Self {
        Self {
            request,
            status: CommandStatus::Pending,
            output: None,
            error: None,
            failure: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.request.correlation_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: CommandStatus) -> Result<(), CommandError> {
        if !self.status.can_transition_to(next) {
            return Err(CommandError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        }
        Ok(())
    }

    /// Pending → Executing
    pub fn mark_executing(&mut self) -> Result<(), CommandError> {
        self.transition(CommandStatus::Executing)
    }

    /// 按 Agent 回报落终态
    pub fn apply_outcome(&mut self, outcome: Outcome) -> Result<(), CommandError> {
        match outcome {
            Outcome::Completed { output } => {
                self.transition(CommandStatus::Completed)?;
                self.output = Some(output);
            }
            Outcome::Failed { error } => {
                self.fail(FailureKind::RemoteExecution, error)?;
            }
        }
        Ok(())
    }

    /// 以指定原因落 Failed（超时走 time_out）
    pub fn fail(&mut self, kind: FailureKind, error: impl Into<String>) -> Result<(), CommandError> {
        self.transition(CommandStatus::Failed)?;
        self.failure = Some(kind);
        self.error = Some(error.into());
        Ok(())
    }

    pub fn time_out(&mut self) -> Result<(), CommandError> {
        self.transition(CommandStatus::TimedOut)?;
        self.failure = Some(FailureKind::TimedOut);
        self.error = Some(format!(
            "command timed out after {} ms",
            self.request.timeout_ms
        ));
        Ok(())
    }
}
