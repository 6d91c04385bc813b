//! 工作流编排器
//!
//! Planning -> Decomposing -> Refining -> Executing -> Consolidating。
//! 编排器不持有 RunState：每个阶段的结果以 RunEvent 发给 run actor，
//! 最终答案（或失败）由 run 的返回值交给 actor 落定。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::react::{PriorAnswer, ReactEvent, ReactExecutor, ReactTask};
use crate::workflow::consolidate::Consolidator;
use crate::workflow::decompose::DecompositionLoop;
use crate::workflow::plan::{generate_or_trivial, PlanGenerator};
use crate::workflow::types::{
    ExecutionMode, FinalAnswer, Question, ReasoningPlan, RunEvent, RunItem, RunPhase, SubAnswer, SubAnswerStatus,
};

/// 生命周期事件的接收方（run actor 的 pub/sub 主题，或测试中的收集器）
pub trait RunEventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// 丢弃所有事件
pub struct NullSink;

impl RunEventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub plan: ReasoningPlan,
    pub items: Vec<RunItem>,
    pub final_answer: FinalAnswer,
}

/// run 级失败，附带已累积的部分结果
#[derive(Debug, Clone)]
pub struct WorkflowFailure {
    pub error: AgentError,
    pub phase: RunPhase,
    pub plan: Option<ReasoningPlan>,
    pub items: Vec<RunItem>,
}

pub struct Orchestrator {
    planner: Arc<dyn PlanGenerator>,
    decomposition: DecompositionLoop,
    executor: Arc<ReactExecutor>,
    consolidator: Consolidator,
}

/// 顺序模式下提供给后续子问题的答案文本
fn answer_context(answer: &SubAnswer) -> String {
    match answer.status {
        SubAnswerStatus::Succeeded => answer.text.clone(),
        _ => format!(
            "(could not be resolved: {})",
            answer.failure_reason.as_deref().unwrap_or("unknown reason")
        ),
    }
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn PlanGenerator>,
        decomposition: DecompositionLoop,
        executor: Arc<ReactExecutor>,
        consolidator: Consolidator,
    ) -> Self {
        Self {
            planner,
            decomposition,
            executor,
            consolidator,
        }
    }

    /// 驱动一个 run 直到得到最终答案或 run 级失败
    pub async fn run(
        &self,
        question: &Question,
        mode: ExecutionMode,
        sink: Arc<dyn RunEventSink>,
        cancel: CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowFailure> {
        enter(&*sink, RunPhase::Planning, question);
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(fail(AgentError::Cancelled, RunPhase::Planning, None, vec![])),
            plan = generate_or_trivial(self.planner.as_ref(), question) => plan,
        };
        sink.emit(RunEvent::PlanReady { plan: plan.clone() });

        enter(&*sink, RunPhase::Decomposing, question);
        let proposed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(fail(AgentError::Cancelled, RunPhase::Decomposing, Some(&plan), vec![])),
            d = self.decomposition.propose(question, &plan) => d,
        };

        enter(&*sink, RunPhase::Refining, question);
        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(fail(AgentError::Cancelled, RunPhase::Refining, Some(&plan), vec![])),
            s = self.decomposition.settle(question, &plan, proposed, &cancel) => s,
        }
        .map_err(|e| fail(e, RunPhase::Refining, Some(&plan), vec![]))?;
        tracing::info!(
            question_id = %question.id,
            sub_questions = settled.accepted.len(),
            iterations = settled.iterations,
            degraded = settled.degraded,
            "sub-questions accepted"
        );
        sink.emit(RunEvent::SubQuestionsAccepted {
            sub_questions: settled.accepted.clone(),
        });

        let items: Vec<RunItem> = settled
            .accepted
            .into_iter()
            .map(|sub_question| RunItem {
                sub_question,
                answer: SubAnswer::pending(),
            })
            .collect();

        enter(&*sink, RunPhase::Executing, question);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReactEvent>();
        let forward_sink = sink.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(ev) = event_rx.recv().await {
                forward_sink.emit(RunEvent::Activity { message: ev.summary() });
            }
        });

        let executed = match mode {
            ExecutionMode::Sequential => self.execute_sequential(question, items, &sink, &cancel, event_tx).await,
            ExecutionMode::Parallel => self.execute_parallel(question, items, &sink, &cancel, event_tx).await,
        };
        // 等待进度事件全部转发完，再进入下一阶段
        let _ = forwarder.await;
        let items = executed.map_err(|(e, items)| fail(e, RunPhase::Executing, Some(&plan), items))?;

        if cancel.is_cancelled() {
            return Err(fail(AgentError::Cancelled, RunPhase::Executing, Some(&plan), items));
        }

        enter(&*sink, RunPhase::Consolidating, question);
        let final_answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.consolidator.consolidate(question, &plan, &items) => r,
        };
        match final_answer {
            Ok(final_answer) => Ok(WorkflowOutcome {
                plan,
                items,
                final_answer,
            }),
            Err(e) => {
                tracing::warn!(question_id = %question.id, error = %e, "consolidation failed");
                Err(fail(e, RunPhase::Consolidating, Some(&plan), items))
            }
        }
    }

    /// 逐个执行；第 j 个子问题可见前 j-1 个子答案
    async fn execute_sequential(
        &self,
        question: &Question,
        mut items: Vec<RunItem>,
        sink: &Arc<dyn RunEventSink>,
        cancel: &CancellationToken,
        event_tx: mpsc::UnboundedSender<ReactEvent>,
    ) -> Result<Vec<RunItem>, (AgentError, Vec<RunItem>)> {
        for i in 0..items.len() {
            let prior_answers: Vec<PriorAnswer> = items[..i]
                .iter()
                .map(|it| PriorAnswer {
                    question: it.sub_question.text.clone(),
                    answer: answer_context(&it.answer),
                })
                .collect();
            let position = items[i].sub_question.position;
            let task = ReactTask {
                position,
                question: items[i].sub_question.text.clone(),
                original_question: Some(question.text.clone()),
                prior_answers,
            };
            match self.executor.run(task, cancel.clone(), Some(&event_tx)).await {
                Ok(answer) => {
                    sink.emit(RunEvent::SubAnswerReady {
                        position,
                        answer: answer.clone(),
                    });
                    items[i].answer = answer;
                }
                Err(e) => return Err((e, items)),
            }
        }
        Ok(items)
    }

    /// 每个子问题一个任务，互不可见；全部终态后返回
    async fn execute_parallel(
        &self,
        question: &Question,
        mut items: Vec<RunItem>,
        sink: &Arc<dyn RunEventSink>,
        cancel: &CancellationToken,
        event_tx: mpsc::UnboundedSender<ReactEvent>,
    ) -> Result<Vec<RunItem>, (AgentError, Vec<RunItem>)> {
        let handles: Vec<_> = items
            .iter()
            .map(|item| {
                let executor = self.executor.clone();
                let sink = sink.clone();
                let token = cancel.child_token();
                let tx = event_tx.clone();
                let position = item.sub_question.position;
                let task = ReactTask {
                    position,
                    question: item.sub_question.text.clone(),
                    original_question: Some(question.text.clone()),
                    prior_answers: Vec::new(),
                };
                tokio::spawn(async move {
                    let result = executor.run(task, token, Some(&tx)).await;
                    if let Ok(answer) = &result {
                        sink.emit(RunEvent::SubAnswerReady {
                            position,
                            answer: answer.clone(),
                        });
                    }
                    result
                })
            })
            .collect();
        drop(event_tx);

        let mut cancelled = false;
        for (item, joined) in items.iter_mut().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(answer)) => item.answer = answer,
                Ok(Err(_)) => cancelled = true,
                Err(e) => {
                    tracing::warn!(position = item.sub_question.position, error = %e, "sub-question task aborted");
                    let answer = SubAnswer::failed(format!("execution task failed: {e}"), vec![]);
                    sink.emit(RunEvent::SubAnswerReady {
                        position: item.sub_question.position,
                        answer: answer.clone(),
                    });
                    item.answer = answer;
                }
            }
        }
        if cancelled {
            return Err((AgentError::Cancelled, items));
        }
        Ok(items)
    }
}

fn fail(error: AgentError, phase: RunPhase, plan: Option<&ReasoningPlan>, items: Vec<RunItem>) -> WorkflowFailure {
    WorkflowFailure {
        error,
        phase,
        plan: plan.cloned(),
        items,
    }
}

fn enter(sink: &dyn RunEventSink, phase: RunPhase, question: &Question) {
    tracing::info!(question_id = %question.id, ?phase, "run phase");
    sink.emit(RunEvent::PhaseChanged { phase });
}
