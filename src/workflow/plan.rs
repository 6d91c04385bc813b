//! 推理结构生成（只规划，不作答）
//!
//! SelfDiscoverPlanner 三次 LLM 调用：选择推理模块 -> 结合问题改写 -> 实现为有序步骤（JSON）。
//! 任意一步失败或得到空计划时，由 generate_or_trivial 退化为单步「直接回答」计划。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::react::extract_json;
use crate::workflow::types::{Question, ReasoningPlan, ReasoningStep};

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, question: &Question) -> Result<ReasoningPlan, AgentError>;
}

/// 规划失败不中断流水线
pub async fn generate_or_trivial(planner: &dyn PlanGenerator, question: &Question) -> ReasoningPlan {
    match planner.generate(question).await {
        Ok(plan) if !plan.is_empty() => plan,
        Ok(_) => {
            tracing::warn!(question_id = %question.id, "empty reasoning plan, using trivial plan");
            ReasoningPlan::trivial()
        }
        Err(e) => {
            tracing::warn!(question_id = %question.id, error = %e, "planning failed, using trivial plan");
            ReasoningPlan::trivial()
        }
    }
}

/// 未配置时使用的推理模块
pub const DEFAULT_REASONING_MODULES: &[&str] = &[
    "How could I break down this problem into smaller, more manageable parts?",
    "What are the key facts or quantities that must be looked up or computed?",
    "Which intermediate results does the final answer depend on, and in what order?",
    "How can I simplify the problem so that it is easier to solve?",
    "What tools or calculations can verify each intermediate result?",
    "Is the problem asking for a numeric result, a comparison, or an explanation?",
    "What assumptions underlie the question, and are they stated explicitly?",
    "Let's think step by step.",
    "Let's make a step by step plan and implement it with good notation and explanation.",
];

#[derive(Deserialize)]
struct PlanJson {
    steps: Vec<StepJson>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepJson {
    Named {
        name: String,
        #[serde(default)]
        description: String,
    },
    Text(String),
}

impl From<StepJson> for ReasoningStep {
    fn from(s: StepJson) -> Self {
        match s {
            StepJson::Named { name, description } => ReasoningStep { name, description },
            StepJson::Text(name) => ReasoningStep {
                name,
                description: String::new(),
            },
        }
    }
}

/// 解析推理结构：`{"steps": [...]}`、步骤数组，或编号列表（"1. ..."）
pub fn parse_plan(output: &str) -> Result<ReasoningPlan, AgentError> {
    // 对象优先，其次数组；都解析不了再按编号列表读取
    let steps: Vec<ReasoningStep> = match extract_json(output, '{').map(serde_json::from_str::<PlanJson>) {
        Some(Ok(parsed)) => parsed.steps.into_iter().map(Into::into).collect(),
        _ => match extract_json(output, '[').map(serde_json::from_str::<Vec<StepJson>>) {
            Some(Ok(steps)) => steps.into_iter().map(Into::into).collect(),
            _ => output.lines().filter_map(numbered_line).collect(),
        },
    };

    let steps: Vec<ReasoningStep> = steps.into_iter().filter(|s| !s.name.trim().is_empty()).collect();
    if steps.is_empty() {
        return Err(AgentError::JsonParseError(format!(
            "no reasoning steps found in: {output}"
        )));
    }
    Ok(ReasoningPlan::new(steps))
}

/// "1. Name: description" / "2) Name"
fn numbered_line(line: &str) -> Option<ReasoningStep> {
    let line = line.trim();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let tail = &line[digits..];
    let rest = tail.strip_prefix('.').or_else(|| tail.strip_prefix(')'))?.trim();
    if rest.is_empty() {
        return None;
    }
    let (name, description) = match rest.split_once(':') {
        Some((n, d)) => (n.trim().to_string(), d.trim().to_string()),
        None => (rest.to_string(), String::new()),
    };
    Some(ReasoningStep { name, description })
}

pub struct SelfDiscoverPlanner {
    llm: Arc<dyn LlmClient>,
    modules: Vec<String>,
}

impl SelfDiscoverPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            modules: DEFAULT_REASONING_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// 空列表时保留默认模块
    pub fn with_modules(mut self, modules: Vec<String>) -> Self {
        if !modules.is_empty() {
            self.modules = modules;
        }
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, AgentError> {
        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::LlmError)
    }
}

#[async_trait]
impl PlanGenerator for SelfDiscoverPlanner {
    async fn generate(&self, question: &Question) -> Result<ReasoningPlan, AgentError> {
        let modules = self
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m))
            .collect::<Vec<_>>()
            .join("\n");

        let selected = self
            .ask(format!(
                "Select several reasoning modules that are crucial to solve the task below. \
                 Do not solve the task.\n\nReasoning modules:\n{modules}\n\nTask: {}",
                question.text
            ))
            .await?;

        let adapted = self
            .ask(format!(
                "Rephrase and specify each selected reasoning module so that it better helps \
                 solving the task. Do not solve the task.\n\nSelected modules:\n{selected}\n\nTask: {}",
                question.text
            ))
            .await?;

        let implemented = self
            .ask(format!(
                "Operationalize the adapted reasoning modules into an ordered, step-by-step \
                 reasoning structure for the task. Do not solve the task and do not include answers. \
                 Reply with JSON only: {{\"steps\": [{{\"name\": \"...\", \"description\": \"...\"}}]}}\n\n\
                 Adapted modules:\n{adapted}\n\nTask: {}",
                question.text
            ))
            .await?;

        let plan = parse_plan(&implemented)?;
        tracing::info!(question_id = %question.id, steps = plan.len(), "reasoning plan generated");
        Ok(plan)
    }
}
