//! 错误类型与恢复动作
//!
//! - `AgentError`：推理 / 规划 / 合成等组件调用失败
//! - `DispatchError`：Actor 方法投递失败（超时、传输错误、重试耗尽）
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt 或 Abort。

use std::time::Duration;

use thiserror::Error;

/// 组件调用过程中可能出现的错误（LLM、解析、超时、取消等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 数据模型不变量被违反
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 最终答案合成失败（对整个 run 致命）
    #[error("Consolidation failed: {0}")]
    ConsolidationFailed(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将纠错提示注入下一轮推理（如输出格式错误），消耗一步预算
    RetryWithPrompt(String),
    /// 终止当前子问题
    Abort,
}

/// Actor 方法投递错误
///
/// 只有 `Timeout` / `Transport` 属于瞬时故障，会按 RetryPolicy 重试；
/// 业务层面的否定结果（子问题失败、run 失败）不会以 DispatchError 出现。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("actor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("call rejected: {0}")]
    Rejected(String),

    #[error("dispatch failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<DispatchError>,
    },
}

impl DispatchError {
    /// 是否为投递 / 可用性层面的瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Timeout(_) | DispatchError::Transport(_))
    }

    /// 调用方重新提交是否可能成功
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, DispatchError::Exhausted { .. })
    }
}
