//! 工作流数据模型
//!
//! RunState 是一次问答 run 的聚合根，只由该 run 的 actor 持有并修改；
//! 其余组件只拿到拷贝（快照）或只读引用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run ID（全局唯一，形如 `run_<uuid>`）
pub type RunId = String;

/// 用户问题：不可变文本 + 标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }
}

/// 推理结构中的一步
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 推理结构：有序的推理步骤；只指导分解与合成，生成后只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningPlan {
    pub steps: Vec<ReasoningStep>,
    /// 规划失败时退化为单步计划
    #[serde(default)]
    pub fallback: bool,
}

impl ReasoningPlan {
    pub fn new(steps: Vec<ReasoningStep>) -> Self {
        Self {
            steps,
            fallback: false,
        }
    }

    /// 退化计划：直接回答
    pub fn trivial() -> Self {
        Self {
            steps: vec![ReasoningStep {
                name: "Answer directly".to_string(),
                description: "Answer the question directly using the available tools.".to_string(),
            }],
            fallback: true,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 越界时取最后一步
    pub fn clamp_step(&self, index: usize) -> usize {
        index.min(self.steps.len().saturating_sub(1))
    }

    pub fn step_name(&self, index: usize) -> &str {
        self.steps
            .get(self.clamp_step(index))
            .map(|s| s.name.as_str())
            .unwrap_or("Answer")
    }

    /// 编号列表，供 prompt 使用
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if s.description.is_empty() {
                    format!("{}. {}", i + 1, s.name)
                } else {
                    format!("{}. {}: {}", i + 1, s.name, s.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQuestionStatus {
    /// 首轮分解产生
    Proposed,
    /// 针对审查意见重新分解产生
    Refined,
    Accepted,
    /// 已被替换；终态
    Rejected,
}

/// 子问题：run 内唯一（`id`），`position` 为最终接受顺序中的序号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: usize,
    pub text: String,
    pub position: usize,
    /// 所属精炼轮次
    pub iteration: usize,
    pub status: SubQuestionStatus,
    /// 服务的推理步骤下标
    pub plan_step: usize,
    /// 达到精炼上限时被强制接受
    #[serde(default)]
    pub forced: bool,
}

impl SubQuestion {
    pub fn new(id: usize, text: impl Into<String>, iteration: usize, plan_step: usize) -> Self {
        Self {
            id,
            text: text.into(),
            position: 0,
            iteration,
            status: if iteration == 0 {
                SubQuestionStatus::Proposed
            } else {
                SubQuestionStatus::Refined
            },
            plan_step,
            forced: false,
        }
    }

    pub fn accept(&mut self) -> Result<(), StateError> {
        match self.status {
            SubQuestionStatus::Proposed | SubQuestionStatus::Refined => {
                self.status = SubQuestionStatus::Accepted;
                Ok(())
            }
            SubQuestionStatus::Accepted => Ok(()),
            SubQuestionStatus::Rejected => Err(self.illegal(SubQuestionStatus::Accepted)),
        }
    }

    /// 强制接受（精炼达到上限）
    pub fn force_accept(&mut self) -> Result<(), StateError> {
        let was_pending = self.status != SubQuestionStatus::Accepted;
        self.accept()?;
        self.forced = self.forced || was_pending;
        Ok(())
    }

    /// 已接受的子问题不能被静默覆盖
    pub fn reject(&mut self) -> Result<(), StateError> {
        match self.status {
            SubQuestionStatus::Proposed | SubQuestionStatus::Refined => {
                self.status = SubQuestionStatus::Rejected;
                Ok(())
            }
            SubQuestionStatus::Rejected => Ok(()),
            SubQuestionStatus::Accepted => Err(self.illegal(SubQuestionStatus::Rejected)),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SubQuestionStatus::Accepted
    }

    fn illegal(&self, to: SubQuestionStatus) -> StateError {
        StateError::IllegalTransition {
            id: self.id,
            from: self.status,
            to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAnswerStatus {
    Pending,
    Succeeded,
    Failed,
}

/// 一次工具调用记录，用于引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub result_summary: String,
    pub ok: bool,
}

/// 子答案：归属唯一的子问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAnswer {
    pub text: String,
    pub provenance: Vec<Provenance>,
    pub status: SubAnswerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SubAnswer {
    pub fn pending() -> Self {
        Self {
            text: String::new(),
            provenance: Vec::new(),
            status: SubAnswerStatus::Pending,
            failure_reason: None,
        }
    }

    pub fn succeeded(text: impl Into<String>, provenance: Vec<Provenance>) -> Self {
        Self {
            text: text.into(),
            provenance,
            status: SubAnswerStatus::Succeeded,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>, provenance: Vec<Provenance>) -> Self {
        Self {
            text: String::new(),
            provenance,
            status: SubAnswerStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SubAnswerStatus::Pending
    }
}

/// 子问题 + 子答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunItem {
    pub sub_question: SubQuestion,
    pub answer: SubAnswer,
}

/// Run 生命周期阶段；顺序即推进顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Decomposing,
    Refining,
    Executing,
    Consolidating,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

/// 子问题执行方式（按 run 选择，不做推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// 逐个执行，后者可见前者的答案
    #[default]
    Sequential,
    /// 并发执行，互不可见
    Parallel,
}

/// 最终答案中的一条引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 形如 "[1]"
    pub marker: String,
    pub position: usize,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub result_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// 未能解决的子问题 position
    pub unresolved: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: usize,
    pub finished_steps: usize,
    pub message: String,
}

/// Run 级失败：可读原因 + 是否值得重新提交
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: String,
    pub retryable: bool,
}

/// RunState 不变量被违反
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("final answer already set")]
    AlreadyFinalized,

    #[error("sub-answers still pending at positions {0:?}")]
    PendingSubAnswers(Vec<usize>),

    #[error("run is archived")]
    Archived,

    #[error("illegal sub-question transition for #{id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: usize,
        from: SubQuestionStatus,
        to: SubQuestionStatus,
    },

    #[error("no sub-question at position {0}")]
    UnknownPosition(usize),

    #[error("sub-answer for position {0} is not terminal")]
    NotTerminal(usize),
}

/// 聚合根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    run_id: RunId,
    question: Question,
    mode: ExecutionMode,
    plan: Option<ReasoningPlan>,
    items: Vec<RunItem>,
    phase: RunPhase,
    final_answer: Option<FinalAnswer>,
    failure: Option<RunFailure>,
    progress: Progress,
    archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(run_id: impl Into<RunId>, question: Question, mode: ExecutionMode) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            question,
            mode,
            plan: None,
            items: Vec::new(),
            phase: RunPhase::Planning,
            final_answer: None,
            failure: None,
            progress: Progress::default(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn plan(&self) -> Option<&ReasoningPlan> {
        self.plan.as_ref()
    }

    pub fn items(&self) -> &[RunItem] {
        &self.items
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.final_answer.as_ref()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn ensure_mutable(&self) -> Result<(), StateError> {
        if self.archived {
            Err(StateError::Archived)
        } else {
            Ok(())
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 推进阶段；回退或进入终态的请求被忽略（返回 false），终态只能经 finalize / fail 进入
    pub fn advance(&mut self, phase: RunPhase) -> Result<bool, StateError> {
        self.ensure_mutable()?;
        if phase.is_terminal() || phase <= self.phase {
            return Ok(false);
        }
        self.phase = phase;
        self.touch();
        Ok(true)
    }

    /// 计划只设置一次
    pub fn set_plan(&mut self, plan: ReasoningPlan) -> Result<bool, StateError> {
        self.ensure_mutable()?;
        if self.plan.is_some() {
            return Ok(false);
        }
        self.plan = Some(plan);
        self.touch();
        Ok(true)
    }

    /// 设置已接受的子问题集合（只设置一次），子答案初始为 pending
    pub fn set_sub_questions(&mut self, accepted: Vec<SubQuestion>) -> Result<bool, StateError> {
        self.ensure_mutable()?;
        if !self.items.is_empty() {
            return Ok(false);
        }
        self.progress.total_steps = accepted.len();
        self.items = accepted
            .into_iter()
            .map(|sub_question| RunItem {
                sub_question,
                answer: SubAnswer::pending(),
            })
            .collect();
        self.touch();
        Ok(true)
    }

    /// 记录终态子答案；已是终态的重复投递被忽略（返回 false）
    pub fn record_answer(&mut self, position: usize, answer: SubAnswer) -> Result<bool, StateError> {
        self.ensure_mutable()?;
        if !answer.is_terminal() {
            return Err(StateError::NotTerminal(position));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.sub_question.position == position)
            .ok_or(StateError::UnknownPosition(position))?;
        if item.answer.is_terminal() {
            return Ok(false);
        }
        item.answer = answer;
        self.progress.finished_steps = self.items.iter().filter(|i| i.answer.is_terminal()).count();
        self.touch();
        Ok(true)
    }

    pub fn set_progress_message(&mut self, message: impl Into<String>) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.progress.message = message.into();
        self.touch();
        Ok(())
    }

    /// 设置最终答案：每个 run 至多一次，且要求所有子答案均已终态；成功后归档
    pub fn finalize(&mut self, answer: FinalAnswer) -> Result<(), StateError> {
        if self.final_answer.is_some() {
            return Err(StateError::AlreadyFinalized);
        }
        self.ensure_mutable()?;
        let pending: Vec<usize> = self
            .items
            .iter()
            .filter(|i| !i.answer.is_terminal())
            .map(|i| i.sub_question.position)
            .collect();
        if !pending.is_empty() {
            return Err(StateError::PendingSubAnswers(pending));
        }
        self.final_answer = Some(answer);
        self.phase = RunPhase::Done;
        self.progress.message = "done".to_string();
        self.archived = true;
        self.touch();
        Ok(())
    }

    /// 以失败结束并归档；保留已累积的部分结果
    pub fn fail(&mut self, failure: RunFailure) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.progress.message = failure.reason.clone();
        self.failure = Some(failure);
        self.phase = RunPhase::Failed;
        self.archived = true;
        self.touch();
        Ok(())
    }
}

/// 工作流向 run actor 报告的生命周期事件（经 pub/sub 投递，消费方须幂等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged { phase: RunPhase },
    PlanReady { plan: ReasoningPlan },
    SubQuestionsAccepted { sub_questions: Vec<SubQuestion> },
    SubAnswerReady { position: usize, answer: SubAnswer },
    Activity { message: String },
}

impl RunEvent {
    /// 幂等地应用到 RunState；返回是否产生了变化
    pub fn apply(self, state: &mut RunState) -> Result<bool, StateError> {
        match self {
            RunEvent::PhaseChanged { phase } => state.advance(phase),
            RunEvent::PlanReady { plan } => state.set_plan(plan),
            RunEvent::SubQuestionsAccepted { sub_questions } => state.set_sub_questions(sub_questions),
            RunEvent::SubAnswerReady { position, answer } => state.record_answer(position, answer),
            RunEvent::Activity { message } => {
                let changed = state.progress().message != message;
                state.set_progress_message(message)?;
                Ok(changed)
            }
        }
    }
}
