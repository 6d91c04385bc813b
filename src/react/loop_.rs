//! ReAct 主循环
//!
//! Reasoning -> Acting -> Observing -> (Reasoning | Done | Failed)。
//! 工具失败记为观察继续推理；真正失败只来自步数预算耗尽或推理调用本身出错。
//! 每次工具调用（无论成败）都按顺序记入子答案的 provenance。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::react::{Action, PriorAnswer, ReactEvent, ReactTrace, Reasoner, ToolCall, TraceStep};
use crate::tools::{ToolError, ToolExecutor, ToolOutput};
use crate::workflow::types::{Provenance, SubAnswer};

/// 默认推理轮数上限
pub const DEFAULT_STEP_BUDGET: usize = 10;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单个子问题的执行状态
#[derive(Debug, Clone, PartialEq)]
pub enum ReactState {
    Reasoning,
    Acting(ToolCall),
    Observing {
        call: ToolCall,
        result: Result<ToolOutput, ToolError>,
    },
    Done(String),
    Failed(String),
}

/// 一个子问题的执行输入
#[derive(Debug, Clone)]
pub struct ReactTask {
    pub position: usize,
    pub question: String,
    pub original_question: Option<String>,
    /// 顺序模式下为前序子答案；并行模式为空
    pub prior_answers: Vec<PriorAnswer>,
}

impl ReactTask {
    pub fn new(position: usize, question: impl Into<String>) -> Self {
        Self {
            position,
            question: question.into(),
            original_question: None,
            prior_answers: Vec::new(),
        }
    }
}

fn send_event(tx: Option<&UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// ReAct 执行器：推理器 + 工具执行器 + 恢复引擎 + 步数预算；可在多个子问题间共享
pub struct ReactExecutor {
    reasoner: Arc<dyn Reasoner>,
    tools: Arc<ToolExecutor>,
    recovery: RecoveryEngine,
    step_budget: usize,
}

impl ReactExecutor {
    pub fn new(reasoner: Arc<dyn Reasoner>, tools: Arc<ToolExecutor>) -> Self {
        Self {
            reasoner,
            tools,
            recovery: RecoveryEngine::new(),
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    /// 执行一个子问题直到 Done / Failed；只有取消会以 Err 返回
    pub async fn run(
        &self,
        task: ReactTask,
        cancel: CancellationToken,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<SubAnswer, AgentError> {
        let position = task.position;
        let mut trace = ReactTrace::new(position, task.question).with_prior_answers(task.prior_answers);
        if let Some(original) = task.original_question {
            trace = trace.with_original_question(original);
        }

        let mut provenance: Vec<Provenance> = Vec::new();
        let mut cycles = 0usize;
        let mut state = ReactState::Reasoning;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(position, "react cancelled");
                return Err(AgentError::Cancelled);
            }

            state = match state {
                ReactState::Reasoning => {
                    if cycles >= self.step_budget {
                        ReactState::Failed(format!(
                            "step budget exceeded ({} reasoning cycles)",
                            self.step_budget
                        ))
                    } else {
                        cycles += 1;
                        send_event(event_tx, ReactEvent::StepUpdate {
                            position,
                            step: cycles,
                            max_steps: self.step_budget,
                        });
                        let next = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                            r = self.reasoner.next_action(&trace) => r,
                        };
                        self.on_reasoned(next, position, &mut trace, event_tx)?
                    }
                }
                ReactState::Acting(call) => {
                    send_event(event_tx, ReactEvent::ToolCall {
                        position,
                        tool: call.tool.clone(),
                        args: serde_json::Value::Object(call.args.clone()),
                    });
                    trace.push(TraceStep::Action(call.clone()));
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        r = self.tools.invoke(&call.tool, &call.args) => r,
                    };
                    ReactState::Observing { call, result }
                }
                ReactState::Observing { call, result } => {
                    let (content, ok) = match &result {
                        Ok(output) => (serde_json::Value::Object(output.clone()).to_string(), true),
                        Err(e) => (e.to_string(), false),
                    };
                    if ok {
                        send_event(event_tx, ReactEvent::Observation {
                            position,
                            tool: call.tool.clone(),
                            preview: preview(&content),
                        });
                    } else {
                        tracing::debug!(position, tool = %call.tool, error = %content, "tool failure fed back as observation");
                        send_event(event_tx, ReactEvent::ToolFailure {
                            position,
                            tool: call.tool.clone(),
                            reason: content.clone(),
                        });
                    }
                    provenance.push(Provenance {
                        tool: call.tool.clone(),
                        arguments: serde_json::Value::Object(call.args),
                        result_summary: preview(&content),
                        ok,
                    });
                    trace.push(TraceStep::Observation {
                        tool: call.tool,
                        content,
                        ok,
                    });
                    ReactState::Reasoning
                }
                ReactState::Done(answer) => {
                    send_event(event_tx, ReactEvent::Answered {
                        position,
                        preview: preview(&answer),
                    });
                    tracing::info!(position, cycles, tools = provenance.len(), "sub-question answered");
                    return Ok(SubAnswer::succeeded(answer, provenance));
                }
                ReactState::Failed(reason) => {
                    send_event(event_tx, ReactEvent::Failed {
                        position,
                        reason: reason.clone(),
                    });
                    tracing::warn!(position, cycles, %reason, "sub-question failed");
                    return Ok(SubAnswer::failed(reason, provenance));
                }
            };
        }
    }

    fn on_reasoned(
        &self,
        next: Result<Action, AgentError>,
        position: usize,
        trace: &mut ReactTrace,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<ReactState, AgentError> {
        match next {
            Ok(Action::FinalAnswer(text)) => Ok(ReactState::Done(text)),
            Ok(Action::InvokeTool(call)) => Ok(ReactState::Acting(call)),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => match self.recovery.handle(&e) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    send_event(event_tx, ReactEvent::Recovery {
                        position,
                        action: "RetryWithPrompt".to_string(),
                        detail: e.to_string(),
                    });
                    trace.push(TraceStep::Correction(prompt));
                    Ok(ReactState::Reasoning)
                }
                RecoveryAction::Abort => {
                    send_event(event_tx, ReactEvent::Recovery {
                        position,
                        action: "Abort".to_string(),
                        detail: e.to_string(),
                    });
                    Ok(ReactState::Failed(format!("reasoning failed: {e}")))
                }
            },
        }
    }
}
