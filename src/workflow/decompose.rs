//! 子问题分解与精炼（有界循环）
//!
//! 1. `Decomposer::decompose` 产生初始候选（Proposed）。
//! 2. `Refiner::refine` 将候选分为 accepted / needs_work。
//! 3. needs_work 中的每一项被重新分解：原项标记 Rejected，替代项（Refined，iteration + 1）占据原位置。
//! 4. needs_work 为空或轮次达到上限时结束；达到上限时剩余 needs_work 原样强制接受。
//!
//! 分解或审查出错、分解结果为空时，退化为以原问题作为唯一子问题。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::react::extract_json;
use crate::workflow::types::{Question, ReasoningPlan, SubQuestion};

/// 分解器的一条输出；`plan_step` 为推理步骤下标（从 0 开始）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub text: String,
    pub plan_step: Option<usize>,
}

impl Proposal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            plan_step: None,
        }
    }

    pub fn for_step(text: impl Into<String>, plan_step: usize) -> Self {
        Self {
            text: text.into(),
            plan_step: Some(plan_step),
        }
    }
}

#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, question: &Question, plan: &ReasoningPlan) -> Result<Vec<Proposal>, AgentError>;

    /// 按审查意见重新分解一个不合格的子问题
    async fn redecompose(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        rejected: &SubQuestion,
        feedback: &str,
    ) -> Result<Vec<Proposal>, AgentError>;
}

/// 审查结果：accepted 与 needs_work（附审查意见）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineOutcome {
    pub accepted: Vec<SubQuestion>,
    pub needs_work: Vec<(SubQuestion, String)>,
}

#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        candidates: Vec<SubQuestion>,
    ) -> Result<RefineOutcome, AgentError>;
}

/// 首轮分解结果
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub candidates: Vec<SubQuestion>,
    /// 以原问题作为唯一子问题（分解出错或为空）
    pub degraded: bool,
}

/// 精炼结束后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SettledQuestions {
    /// 全部为 Accepted，position 按最终顺序重新编号
    pub accepted: Vec<SubQuestion>,
    /// 被替换掉的子问题（Rejected）
    pub rejected: Vec<SubQuestion>,
    pub iterations: usize,
    pub degraded: bool,
}

/// 分解 / 精炼协同循环
pub struct DecompositionLoop {
    decomposer: Arc<dyn Decomposer>,
    refiner: Arc<dyn Refiner>,
    max_iterations: usize,
}

impl DecompositionLoop {
    pub fn new(decomposer: Arc<dyn Decomposer>, refiner: Arc<dyn Refiner>, max_iterations: usize) -> Self {
        Self {
            decomposer,
            refiner,
            max_iterations,
        }
    }

    fn original_only(question: &Question) -> Vec<SubQuestion> {
        vec![SubQuestion::new(0, question.text.clone(), 0, 0)]
    }

    pub async fn propose(&self, question: &Question, plan: &ReasoningPlan) -> Decomposition {
        match self.decomposer.decompose(question, plan).await {
            Ok(proposals) => {
                let candidates: Vec<SubQuestion> = proposals
                    .into_iter()
                    .filter(|p| !p.text.trim().is_empty())
                    .enumerate()
                    .map(|(i, p)| {
                        let step = plan.clamp_step(p.plan_step.unwrap_or(i));
                        let mut sq = SubQuestion::new(i, p.text.trim(), 0, step);
                        sq.position = i;
                        sq
                    })
                    .collect();
                if candidates.is_empty() {
                    tracing::info!(question_id = %question.id, "empty decomposition, using original question");
                    Decomposition {
                        candidates: Self::original_only(question),
                        degraded: true,
                    }
                } else {
                    Decomposition {
                        candidates,
                        degraded: false,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(question_id = %question.id, error = %e, "decomposition failed, using original question");
                Decomposition {
                    candidates: Self::original_only(question),
                    degraded: true,
                }
            }
        }
    }

    /// 循环至 needs_work 为空或达到 max_iterations
    pub async fn settle(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        decomposition: Decomposition,
        cancel: &CancellationToken,
    ) -> Result<SettledQuestions, AgentError> {
        if decomposition.degraded {
            return Ok(Self::accept_all(decomposition.candidates, Vec::new(), 0, true));
        }

        let mut next_id = decomposition.candidates.iter().map(|s| s.id + 1).max().unwrap_or(0);
        let mut current = decomposition.candidates;
        let mut rejected: Vec<SubQuestion> = Vec::new();
        let mut iteration = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let pending: Vec<SubQuestion> = current.iter().filter(|s| !s.is_accepted()).cloned().collect();
            if pending.is_empty() {
                break;
            }

            let outcome = match self.refiner.refine(question, plan, pending.clone()).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(question_id = %question.id, error = %e, "refinement failed, using original question");
                    return Ok(Self::accept_all(Self::original_only(question), Vec::new(), iteration, true));
                }
            };

            // 审查器未提及的候选视为通过
            let needs_work: Vec<(usize, String)> = outcome
                .needs_work
                .iter()
                .filter(|(sq, _)| pending.iter().any(|p| p.id == sq.id))
                .map(|(sq, feedback)| (sq.id, feedback.clone()))
                .collect();
            for sq in current.iter_mut().filter(|s| !s.is_accepted()) {
                if !needs_work.iter().any(|(id, _)| *id == sq.id) {
                    sq.accept().map_err(|e| AgentError::InvalidState(e.to_string()))?;
                }
            }

            if needs_work.is_empty() {
                break;
            }
            if iteration >= self.max_iterations {
                tracing::info!(
                    question_id = %question.id,
                    iteration,
                    remaining = needs_work.len(),
                    "refinement cap reached, force-accepting remaining sub-questions"
                );
                for sq in current.iter_mut().filter(|s| !s.is_accepted()) {
                    sq.force_accept().map_err(|e| AgentError::InvalidState(e.to_string()))?;
                }
                break;
            }

            iteration += 1;
            tracing::debug!(question_id = %question.id, iteration, needs_work = needs_work.len(), "refining sub-questions");

            let mut next_round: Vec<SubQuestion> = Vec::with_capacity(current.len());
            for mut sq in current.into_iter() {
                let feedback = match needs_work.iter().find(|(id, _)| *id == sq.id) {
                    Some((_, f)) => f.clone(),
                    None => {
                        next_round.push(sq);
                        continue;
                    }
                };
                let replacements = match self.decomposer.redecompose(question, plan, &sq, &feedback).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(question_id = %question.id, error = %e, "re-decomposition failed, using original question");
                        return Ok(Self::accept_all(Self::original_only(question), Vec::new(), iteration, true));
                    }
                };
                let replacements: Vec<Proposal> =
                    replacements.into_iter().filter(|p| !p.text.trim().is_empty()).collect();
                if replacements.is_empty() {
                    // 无替代项时原样保留，避免丢失子问题
                    sq.force_accept().map_err(|e| AgentError::InvalidState(e.to_string()))?;
                    next_round.push(sq);
                    continue;
                }
                for p in replacements {
                    let step = plan.clamp_step(p.plan_step.unwrap_or(sq.plan_step));
                    next_round.push(SubQuestion::new(next_id, p.text.trim(), iteration, step));
                    next_id += 1;
                }
                sq.reject().map_err(|e| AgentError::InvalidState(e.to_string()))?;
                rejected.push(sq);
            }
            current = next_round;
        }

        Ok(Self::accept_all(current, rejected, iteration, false))
    }

    fn accept_all(
        mut accepted: Vec<SubQuestion>,
        rejected: Vec<SubQuestion>,
        iterations: usize,
        degraded: bool,
    ) -> SettledQuestions {
        for (position, sq) in accepted.iter_mut().enumerate() {
            // Rejected 项不会出现在这里；accept 只会从 Proposed / Refined 前进
            let _ = sq.accept();
            sq.position = position;
        }
        SettledQuestions {
            accepted,
            rejected,
            iterations,
            degraded,
        }
    }
}

#[derive(Deserialize)]
struct DecompositionJson {
    sub_questions: Vec<ProposalJson>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProposalJson {
    Tagged {
        question: String,
        /// 从 1 开始的推理步骤编号
        #[serde(default)]
        step: Option<usize>,
    },
    Text(String),
}

/// 解析分解结果：`{"sub_questions": [...]}` 或数组；元素可为字符串或 {"question", "step"}
pub fn parse_proposals(output: &str) -> Result<Vec<Proposal>, AgentError> {
    // 先按对象解析，失败再按数组；正文里的 [n] 不影响对象
    let items: Vec<ProposalJson> = match extract_json(output, '{').map(serde_json::from_str::<DecompositionJson>) {
        Some(Ok(parsed)) => parsed.sub_questions,
        object => match extract_json(output, '[') {
            Some(json) => {
                serde_json::from_str(json).map_err(|e| AgentError::JsonParseError(format!("{e}: {json}")))?
            }
            None => {
                return Err(AgentError::JsonParseError(match object {
                    Some(Err(e)) => format!("{e}: {output}"),
                    _ => format!("no JSON in: {output}"),
                }))
            }
        },
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            ProposalJson::Tagged { question, step } => Proposal {
                text: question,
                plan_step: step.map(|s| s.saturating_sub(1)),
            },
            ProposalJson::Text(text) => Proposal::new(text),
        })
        .collect())
}

/// 基于 LLM 的分解器
pub struct LlmDecomposer {
    llm: Arc<dyn LlmClient>,
}

impl LlmDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn ask(&self, prompt: String) -> Result<Vec<Proposal>, AgentError> {
        let output = self
            .llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::LlmError)?;
        parse_proposals(&output)
    }
}

const DECOMPOSE_FORMAT: &str = "Reply with JSON only: {\"sub_questions\": [{\"question\": \"...\", \"step\": <reasoning step number>}]}. \
Each sub-question must be answerable on its own with the available tools. \
If the question is already simple, return an empty list.";

#[async_trait]
impl Decomposer for LlmDecomposer {
    async fn decompose(&self, question: &Question, plan: &ReasoningPlan) -> Result<Vec<Proposal>, AgentError> {
        self.ask(format!(
            "Break the question into the minimal set of simpler sub-questions, following the reasoning structure.\n\n\
             Reasoning structure:\n{}\n\nQuestion: {}\n\n{DECOMPOSE_FORMAT}",
            plan.render(),
            question.text
        ))
        .await
    }

    async fn redecompose(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        rejected: &SubQuestion,
        feedback: &str,
    ) -> Result<Vec<Proposal>, AgentError> {
        self.ask(format!(
            "A sub-question of the question below was judged unsuitable.\n\n\
             Reasoning structure:\n{}\n\nQuestion: {}\nSub-question: {}\nReview: {}\n\n\
             Rewrite it as one or more better sub-questions. {DECOMPOSE_FORMAT}",
            plan.render(),
            question.text,
            rejected.text,
            feedback
        ))
        .await
    }
}

#[derive(Deserialize)]
struct ReviewJson {
    #[serde(default)]
    reviews: Vec<ReviewItem>,
}

#[derive(Deserialize)]
struct ReviewItem {
    /// 从 1 开始的候选编号
    index: usize,
    ok: bool,
    #[serde(default)]
    feedback: String,
}

/// 基于 LLM 的审查器：每个候选给出 ok / feedback
pub struct LlmRefiner {
    llm: Arc<dyn LlmClient>,
    criteria: String,
}

/// 默认审查标准
pub const DEFAULT_REFINEMENT_CRITERIA: &str = "A good sub-question is specific, self-contained, \
answerable with a single tool call or fact lookup, not redundant with the other sub-questions, \
and necessary for answering the original question.";

impl LlmRefiner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            criteria: DEFAULT_REFINEMENT_CRITERIA.to_string(),
        }
    }

    pub fn with_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = criteria.into();
        self
    }
}

#[async_trait]
impl Refiner for LlmRefiner {
    async fn refine(
        &self,
        question: &Question,
        plan: &ReasoningPlan,
        candidates: Vec<SubQuestion>,
    ) -> Result<RefineOutcome, AgentError> {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, sq)| format!("{}. {}", i + 1, sq.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Review the candidate sub-questions for the question below.\n\nCriteria: {}\n\n\
             Reasoning structure:\n{}\n\nQuestion: {}\n\nCandidates:\n{listing}\n\n\
             Reply with JSON only: {{\"reviews\": [{{\"index\": 1, \"ok\": true, \"feedback\": \"\"}}]}}",
            self.criteria,
            plan.render(),
            question.text
        );
        let output = self
            .llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::LlmError)?;
        let json = extract_json(&output, '{')
            .ok_or_else(|| AgentError::JsonParseError(format!("no JSON in: {output}")))?;
        let reviews: ReviewJson =
            serde_json::from_str(json).map_err(|e| AgentError::JsonParseError(format!("{e}: {json}")))?;

        let mut outcome = RefineOutcome::default();
        for (i, sq) in candidates.into_iter().enumerate() {
            match reviews.reviews.iter().find(|r| r.index == i + 1) {
                Some(r) if !r.ok => outcome.needs_work.push((sq, r.feedback.clone())),
                _ => outcome.accepted.push(sq),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::workflow::types::SubQuestionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedDecomposer {
        initial: Vec<Proposal>,
        redecompose_calls: AtomicUsize,
    }

    #[async_trait]
    impl Decomposer for FixedDecomposer {
        async fn decompose(&self, _q: &Question, _p: &ReasoningPlan) -> Result<Vec<Proposal>, AgentError> {
            Ok(self.initial.clone())
        }

        async fn redecompose(
            &self,
            _q: &Question,
            _p: &ReasoningPlan,
            rejected: &SubQuestion,
            _feedback: &str,
        ) -> Result<Vec<Proposal>, AgentError> {
            self.redecompose_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Proposal::new(format!("{} (clarified)", rejected.text))])
        }
    }

    /// 拒绝文本中包含 "vague" 的候选
    struct VagueRefiner;

    #[async_trait]
    impl Refiner for VagueRefiner {
        async fn refine(
            &self,
            _q: &Question,
            _p: &ReasoningPlan,
            candidates: Vec<SubQuestion>,
        ) -> Result<RefineOutcome, AgentError> {
            let mut out = RefineOutcome::default();
            for sq in candidates {
                if sq.text.contains("vague") && !sq.text.contains("clarified") {
                    out.needs_work.push((sq, "too vague".into()));
                } else {
                    out.accepted.push(sq);
                }
            }
            Ok(out)
        }
    }

    /// 永不满意
    struct NeverSatisfied;

    #[async_trait]
    impl Refiner for NeverSatisfied {
        async fn refine(
            &self,
            _q: &Question,
            _p: &ReasoningPlan,
            candidates: Vec<SubQuestion>,
        ) -> Result<RefineOutcome, AgentError> {
            Ok(RefineOutcome {
                accepted: vec![],
                needs_work: candidates.into_iter().map(|sq| (sq, "again".to_string())).collect(),
            })
        }
    }

    fn decomposer(initial: Vec<Proposal>) -> Arc<FixedDecomposer> {
        Arc::new(FixedDecomposer {
            initial,
            redecompose_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_needs_work_is_replaced_in_place() {
        let d = decomposer(vec![Proposal::new("count r"), Proposal::new("vague thing"), Proposal::new("add")]);
        let lp = DecompositionLoop::new(d.clone(), Arc::new(VagueRefiner), 3);
        let q = Question::new("q");
        let plan = ReasoningPlan::trivial();

        let proposed = lp.propose(&q, &plan).await;
        assert!(!proposed.degraded);
        let settled = lp.settle(&q, &plan, proposed, &CancellationToken::new()).await.unwrap();

        let texts: Vec<&str> = settled.accepted.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["count r", "vague thing (clarified)", "add"]);
        assert_eq!(settled.accepted[1].iteration, 1);
        assert_eq!(settled.accepted[1].position, 1);
        assert!(settled.accepted.iter().all(|s| s.status == SubQuestionStatus::Accepted));
        assert_eq!(settled.rejected.len(), 1);
        assert_eq!(settled.rejected[0].status, SubQuestionStatus::Rejected);
        assert_eq!(settled.iterations, 1);
    }

    #[tokio::test]
    async fn test_refinement_cap_force_accepts() {
        let d = decomposer(vec![Proposal::new("a"), Proposal::new("b")]);
        let lp = DecompositionLoop::new(d.clone(), Arc::new(NeverSatisfied), 2);
        let q = Question::new("q");
        let plan = ReasoningPlan::trivial();

        let proposed = lp.propose(&q, &plan).await;
        let settled = lp.settle(&q, &plan, proposed, &CancellationToken::new()).await.unwrap();

        assert_eq!(settled.iterations, 2);
        assert_eq!(settled.accepted.len(), 2);
        assert!(settled.accepted.iter().all(|s| s.forced && s.is_accepted()));
        assert!(settled.accepted.iter().all(|s| s.iteration <= 2));
        assert_eq!(d.redecompose_calls.load(Ordering::SeqCst), 4);
        assert_eq!(settled.rejected.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_cap_never_redecomposes() {
        let d = decomposer(vec![Proposal::new("a")]);
        let lp = DecompositionLoop::new(d.clone(), Arc::new(NeverSatisfied), 0);
        let q = Question::new("q");
        let plan = ReasoningPlan::trivial();
        let proposed = lp.propose(&q, &plan).await;
        let settled = lp.settle(&q, &plan, proposed, &CancellationToken::new()).await.unwrap();
        assert_eq!(settled.iterations, 0);
        assert_eq!(d.redecompose_calls.load(Ordering::SeqCst), 0);
        assert!(settled.accepted[0].forced);
    }

    #[tokio::test]
    async fn test_empty_decomposition_uses_original_question() {
        let d = decomposer(vec![]);
        let lp = DecompositionLoop::new(d, Arc::new(NeverSatisfied), 3);
        let q = Question::new("What is 2+2?");
        let plan = ReasoningPlan::trivial();

        let proposed = lp.propose(&q, &plan).await;
        assert!(proposed.degraded);
        let settled = lp.settle(&q, &plan, proposed, &CancellationToken::new()).await.unwrap();
        assert_eq!(settled.accepted.len(), 1);
        assert_eq!(settled.accepted[0].text, "What is 2+2?");
        assert!(settled.accepted[0].is_accepted());
    }

    #[test]
    fn test_parse_proposals() {
        let p = parse_proposals(
            r#"{"sub_questions": [{"question": "count r in strawberry", "step": 1}, "compute 3+4"]}"#,
        )
        .unwrap();
        assert_eq!(p, vec![Proposal::for_step("count r in strawberry", 0), Proposal::new("compute 3+4")]);
        assert!(parse_proposals("[]").unwrap().is_empty());
        assert!(parse_proposals("nothing").is_err());
    }

    #[test]
    fn test_parse_proposals_ignores_prose_brackets() {
        let p = parse_proposals(r#"Here are the [2] sub-questions: {"sub_questions": ["count r", "compute 3+4"]}"#)
            .unwrap();
        assert_eq!(p, vec![Proposal::new("count r"), Proposal::new("compute 3+4")]);

        let bare = parse_proposals(r#"[{"question": "count r", "step": 2}, {"question": "compute 3+4"}]"#).unwrap();
        assert_eq!(bare, vec![Proposal::for_step("count r", 1), Proposal::new("compute 3+4")]);
    }

    #[tokio::test]
    async fn test_llm_refiner_partitions_by_index() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"reviews": [{"index": 1, "ok": true}, {"index": 2, "ok": false, "feedback": "too broad"}]}"#,
        ]));
        let refiner = LlmRefiner::new(llm);
        let candidates = vec![SubQuestion::new(0, "a", 0, 0), SubQuestion::new(1, "b", 0, 0)];
        let out = refiner
            .refine(&Question::new("q"), &ReasoningPlan::trivial(), candidates)
            .await
            .unwrap();
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.needs_work[0].0.text, "b");
        assert_eq!(out.needs_work[0].1, "too broad");
    }
}
