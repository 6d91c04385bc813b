//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 执行器决定是纠错重试还是终止子问题。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：模型输出无法解析时注入纠错提示，其余推理故障一律终止
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed ({raw}). \
                 To call a tool, reply with exactly one JSON object of the form \
                 {{\"tool\": \"<tool name>\", \"args\": {{...}}}}. \
                 To finish, reply with {{\"answer\": \"<final answer>\"}} or plain text."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}
