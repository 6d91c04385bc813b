//! 核心层：错误类型与恢复引擎

pub mod error;
pub mod recovery;

pub use error::{AgentError, DispatchError, RecoveryAction};
pub use recovery::RecoveryEngine;
