//! 最终答案合成
//!
//! 按推理步骤顺序（plan_step, position）组织子答案；成功子答案的成功工具调用编号为引用 `[n]`，
//! 失败子答案以「could not be resolved」显式列出。合成调用出错对 run 致命，不返回半成品。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::workflow::types::{Citation, FinalAnswer, Question, ReasoningPlan, RunItem, SubAnswerStatus};

/// 一个子问题在合成输入中的视图
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub step_name: String,
    pub position: usize,
    pub sub_question: String,
    pub answer_text: String,
    pub resolved: bool,
    /// 已解决时为引用标记；未解决时为失败原因
    pub markers: Vec<String>,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// 返回答案正文；引用标记由正文自行引用
    async fn synthesize(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        sections: &[Section],
    ) -> Result<String, AgentError>;
}

pub struct Consolidator {
    synthesizer: Arc<dyn Synthesizer>,
}

impl Consolidator {
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self { synthesizer }
    }

    pub async fn consolidate(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        items: &[RunItem],
    ) -> Result<FinalAnswer, AgentError> {
        let pending: Vec<usize> = items
            .iter()
            .filter(|i| !i.answer.is_terminal())
            .map(|i| i.sub_question.position)
            .collect();
        if !pending.is_empty() {
            return Err(AgentError::InvalidState(format!(
                "sub-answers still pending at positions {pending:?}"
            )));
        }

        let mut ordered: Vec<&RunItem> = items.iter().collect();
        ordered.sort_by_key(|i| (i.sub_question.plan_step, i.sub_question.position));

        let mut citations: Vec<Citation> = Vec::new();
        let mut sections: Vec<Section> = Vec::with_capacity(ordered.len());
        let mut unresolved: Vec<usize> = Vec::new();

        for item in ordered {
            let sq = &item.sub_question;
            let resolved = item.answer.status == SubAnswerStatus::Succeeded;
            let mut markers = Vec::new();
            if resolved {
                for p in item.answer.provenance.iter().filter(|p| p.ok) {
                    let marker = format!("[{}]", citations.len() + 1);
                    citations.push(Citation {
                        marker: marker.clone(),
                        position: sq.position,
                        tool: p.tool.clone(),
                        arguments: p.arguments.clone(),
                        result_summary: p.result_summary.clone(),
                    });
                    markers.push(marker);
                }
            } else {
                unresolved.push(sq.position);
            }
            sections.push(Section {
                step_name: plan.step_name(sq.plan_step).to_string(),
                position: sq.position,
                sub_question: sq.text.clone(),
                answer_text: item.answer.text.clone(),
                resolved,
                markers,
                failure_reason: item.answer.failure_reason.clone(),
            });
        }

        let body = self
            .synthesizer
            .synthesize(question, plan, &sections)
            .await
            .map_err(|e| AgentError::ConsolidationFailed(e.to_string()))?;
        let body = body.trim();
        if body.is_empty() {
            return Err(AgentError::ConsolidationFailed("synthesis returned empty text".into()));
        }

        let mut text = body.to_string();
        if !unresolved.is_empty() {
            text.push_str("\n\nUnresolved:");
            for s in sections.iter().filter(|s| !s.resolved) {
                text.push_str(&format!(
                    "\n- {}: could not be resolved ({})",
                    s.sub_question,
                    s.failure_reason.as_deref().unwrap_or("unknown reason")
                ));
            }
        }
        if !citations.is_empty() {
            text.push_str("\n\nSources:");
            for c in &citations {
                text.push_str(&format!("\n{} {}({}) -> {}", c.marker, c.tool, c.arguments, c.result_summary));
            }
        }

        tracing::info!(
            question_id = %question.id,
            citations = citations.len(),
            unresolved = unresolved.len(),
            "final answer consolidated"
        );
        Ok(FinalAnswer {
            text,
            citations,
            unresolved,
            created_at: Utc::now(),
        })
    }
}

/// 基于 LLM 的合成器
pub struct LlmSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn render_sections(sections: &[Section]) -> String {
    let mut out = String::new();
    let mut current_step: Option<&str> = None;
    for s in sections {
        if current_step != Some(s.step_name.as_str()) {
            out.push_str(&format!("## {}\n", s.step_name));
            current_step = Some(s.step_name.as_str());
        }
        out.push_str(&format!("Sub-question: {}\n", s.sub_question));
        if s.resolved {
            out.push_str(&format!("Answer: {} {}\n", s.answer_text, s.markers.join("")));
        } else {
            out.push_str("Answer: could not be resolved\n");
        }
    }
    out
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        sections: &[Section],
    ) -> Result<String, AgentError> {
        let prompt = format!(
            "Answer the question using only the sub-answers below, following the reasoning structure. \
             Cite sources with their markers such as [1]. If a sub-question could not be resolved, \
             say so instead of guessing.\n\nReasoning structure:\n{}\n\nSub-answers:\n{}\nQuestion: {}",
            plan.render(),
            render_sections(sections),
            question.text
        );
        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::workflow::types::{Provenance, ReasoningStep, SubAnswer, SubQuestion};

    fn item(position: usize, plan_step: usize, text: &str, answer: SubAnswer) -> RunItem {
        let mut sq = SubQuestion::new(position, text, 0, plan_step);
        sq.position = position;
        sq.accept().unwrap();
        RunItem { sub_question: sq, answer }
    }

    fn prov(tool: &str, ok: bool) -> Provenance {
        Provenance {
            tool: tool.into(),
            arguments: serde_json::json!({}),
            result_summary: "{\"result\":1}".into(),
            ok,
        }
    }

    fn two_step_plan() -> ReasoningPlan {
        ReasoningPlan::new(vec![
            ReasoningStep { name: "Gather".into(), description: String::new() },
            ReasoningStep { name: "Combine".into(), description: String::new() },
        ])
    }

    #[tokio::test]
    async fn test_orders_by_plan_step_and_marks_unresolved() {
        let llm = Arc::new(ScriptedLlmClient::new(["The answer is 21 [1][2]."]));
        let consolidator = Consolidator::new(Arc::new(LlmSynthesizer::new(llm.clone())));
        let items = vec![
            item(0, 1, "multiply", SubAnswer::succeeded("21", vec![prov("multiply", true)])),
            item(1, 0, "count r", SubAnswer::succeeded("3", vec![prov("web_search", false), prov("count_substrings", true)])),
            item(2, 0, "look up", SubAnswer::failed("step budget exceeded (3 reasoning cycles)", vec![])),
        ];

        let answer = consolidator
            .consolidate(&Question::new("q"), &two_step_plan(), &items)
            .await
            .unwrap();

        let tools: Vec<&str> = answer.citations.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, vec!["count_substrings", "multiply"]);
        assert_eq!(answer.citations[0].marker, "[1]");
        assert_eq!(answer.unresolved, vec![2]);
        assert!(answer.text.contains("look up: could not be resolved (step budget exceeded"));
        assert!(answer.text.contains("[2] multiply"));

        let prompt = &llm.calls()[0][0].content;
        let gather = prompt.find("## Gather").unwrap();
        let combine = prompt.find("## Combine").unwrap();
        assert!(gather < combine);
    }

    #[tokio::test]
    async fn test_synthesis_error_is_fatal() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        llm.push_error("backend down");
        let consolidator = Consolidator::new(Arc::new(LlmSynthesizer::new(llm)));
        let items = vec![item(0, 0, "a", SubAnswer::succeeded("1", vec![]))];
        let result = consolidator
            .consolidate(&Question::new("q"), &ReasoningPlan::trivial(), &items)
            .await;
        assert!(matches!(result, Err(AgentError::ConsolidationFailed(_))));
    }

    #[tokio::test]
    async fn test_pending_items_are_rejected() {
        let llm = Arc::new(ScriptedLlmClient::new(["x"]));
        let consolidator = Consolidator::new(Arc::new(LlmSynthesizer::new(llm.clone())));
        let items = vec![item(0, 0, "a", SubAnswer::pending())];
        let result = consolidator
            .consolidate(&Question::new("q"), &ReasoningPlan::trivial(), &items)
            .await;
        assert!(matches!(result, Err(AgentError::InvalidState(_))));
        assert_eq!(llm.call_count(), 0);
    }
}
