//! ReAct 过程事件：推理步数、工具调用、观察、恢复与结束，供进度展示

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）；`position` 为子问题序号
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 进入第几轮推理
    StepUpdate { position: usize, step: usize, max_steps: usize },
    ToolCall {
        position: usize,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        position: usize,
        tool: String,
        preview: String,
    },
    /// 工具失败（作为观察回灌推理）
    ToolFailure {
        position: usize,
        tool: String,
        reason: String,
    },
    Recovery {
        position: usize,
        action: String,
        detail: String,
    },
    Answered { position: usize, preview: String },
    Failed { position: usize, reason: String },
}

impl ReactEvent {
    /// 一行可读摘要
    pub fn summary(&self) -> String {
        match self {
            ReactEvent::StepUpdate { position, step, max_steps } => {
                format!("sub-question {position}: reasoning step {step}/{max_steps}")
            }
            ReactEvent::ToolCall { position, tool, .. } => {
                format!("sub-question {position}: calling {tool}")
            }
            ReactEvent::Observation { position, tool, preview } => {
                format!("sub-question {position}: {tool} -> {preview}")
            }
            ReactEvent::ToolFailure { position, tool, reason } => {
                format!("sub-question {position}: {tool} failed ({reason})")
            }
            ReactEvent::Recovery { position, action, .. } => {
                format!("sub-question {position}: recovery {action}")
            }
            ReactEvent::Answered { position, preview } => {
                format!("sub-question {position}: answered {preview}")
            }
            ReactEvent::Failed { position, reason } => {
                format!("sub-question {position}: failed ({reason})")
            }
        }
    }
}
