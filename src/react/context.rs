//! ReAct 追加式上下文
//!
//! 每个子问题一份：任务描述（子问题、原问题、前序答案）在构造时确定，
//! 执行过程中只能追加动作 / 观察 / 纠错提示，不能修改或删除已有步骤。

use serde::{Deserialize, Serialize};

use crate::react::ToolCall;

/// 顺序执行时前序子问题的答案
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceStep {
    Action(ToolCall),
    Observation { tool: String, content: String, ok: bool },
    /// 恢复引擎注入的纠错提示
    Correction(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactTrace {
    position: usize,
    question: String,
    original_question: Option<String>,
    prior_answers: Vec<PriorAnswer>,
    steps: Vec<TraceStep>,
}

impl ReactTrace {
    pub fn new(position: usize, question: impl Into<String>) -> Self {
        Self {
            position,
            question: question.into(),
            original_question: None,
            prior_answers: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_original_question(mut self, original: impl Into<String>) -> Self {
        self.original_question = Some(original.into());
        self
    }

    pub fn with_prior_answers(mut self, prior: Vec<PriorAnswer>) -> Self {
        self.prior_answers = prior;
        self
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn original_question(&self) -> Option<&str> {
        self.original_question.as_deref()
    }

    pub fn prior_answers(&self) -> &[PriorAnswer] {
        &self.prior_answers
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// 最近一次观察
    pub fn last_observation(&self) -> Option<(&str, &str, bool)> {
        self.steps.iter().rev().find_map(|s| match s {
            TraceStep::Observation { tool, content, ok } => Some((tool.as_str(), content.as_str(), *ok)),
            _ => None,
        })
    }
}
