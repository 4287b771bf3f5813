//! 指令生命周期：关联 ID、注册表、超时监管、历史日志与引擎

mod dispatcher;
mod engine;
pub mod history;
pub mod id;
mod reconciler;
pub mod registry;
pub mod timeout;
pub mod types;

pub use engine::{CommandEngine, EngineParts, OperatorInput};
pub use history::{HistoryEntry, HistoryEvent, HistoryLog};
pub use id::CorrelationId;
pub use reconciler::Reconciliation;
pub use registry::CorrelationRegistry;
pub use timeout::TimeoutSupervisor;
pub use types::{CommandRecord, CommandRequest, CommandStatus, CommandType, Outcome};
