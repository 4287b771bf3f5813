//! 核心层：错误分类、引擎装配、优雅关闭

pub mod builder;
pub mod error;
pub mod shutdown;

pub use builder::{create_engine_builder, EngineBuilder};
pub use error::{CommandError, DispatchError, FailureKind, TranslationError};
pub use shutdown::{EngineCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
