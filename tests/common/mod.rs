//! 集成测试共用的确定性推理器、分解器、合成器与传输层

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dqa::actor::{ActorMethod, ActorRef, ActorReply, LocalTransport, Transport};
use dqa::core::{AgentError, DispatchError};
use dqa::react::{Action, PriorAnswer, ReactExecutor, ReactTrace, Reasoner, ToolCall};
use dqa::tools::{builtin_registry, ToolArgs, ToolExecutor};
use dqa::workflow::{
    Consolidator, DecompositionLoop, Decomposer, Orchestrator, PlanGenerator, Proposal, Question, ReasoningPlan,
    ReasoningStep, RefineOutcome, Refiner, RunEvent, RunEventSink, Section, SubQuestion, Synthesizer,
};
use tokio::sync::Notify;

pub const STRAWBERRY: &str = "What is (number of letter r in 'strawberry') times (3+4)?";
pub const COUNT_R: &str = "How many times does the letter r occur in strawberry?";
pub const ADD_3_4: &str = "What is 3 + 4?";
pub const NEVER_ENDS: &str = "Keep looking things up forever";

fn args(value: serde_json::Value) -> ToolArgs {
    value.as_object().cloned().unwrap_or_default()
}

/// 按关键词决定动作：有成功观察就用其 result 作答
#[derive(Default)]
pub struct KeywordReasoner {
    traces: Mutex<Vec<ReactTrace>>,
}

impl KeywordReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每个子问题首次推理时看到的上下文
    pub fn first_traces(&self) -> Vec<ReactTrace> {
        self.traces
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.steps().is_empty())
            .cloned()
            .collect()
    }

    pub fn prior_answers_for(&self, position: usize) -> Vec<PriorAnswer> {
        self.first_traces()
            .into_iter()
            .find(|t| t.position() == position)
            .map(|t| t.prior_answers().to_vec())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reasoner for KeywordReasoner {
    async fn next_action(&self, trace: &ReactTrace) -> Result<Action, AgentError> {
        self.traces.lock().unwrap().push(trace.clone());
        let question = trace.question();

        if question == NEVER_ENDS {
            return Ok(Action::InvokeTool(ToolCall {
                tool: "add".into(),
                args: args(serde_json::json!({"augend": 1, "summand": 1})),
            }));
        }

        if let Some((_, content, true)) = trace.last_observation() {
            let value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| AgentError::JsonParseError(e.to_string()))?;
            return Ok(Action::FinalAnswer(value["result"].to_string()));
        }

        if question.contains("letter r") {
            Ok(Action::InvokeTool(ToolCall {
                tool: "count_substrings".into(),
                args: args(serde_json::json!({"string": "strawberry", "substring": "r"})),
            }))
        } else if question.contains("3 + 4") {
            Ok(Action::InvokeTool(ToolCall {
                tool: "add".into(),
                args: args(serde_json::json!({"augend": 3, "summand": 4})),
            }))
        } else {
            Ok(Action::FinalAnswer("42".into()))
        }
    }
}

/// 在放行前阻塞推理；取消由执行器负责打断
pub struct GatedReasoner {
    gate: Arc<Notify>,
    opened: std::sync::atomic::AtomicBool,
    inner: KeywordReasoner,
    pub waiting: AtomicUsize,
}

impl GatedReasoner {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            opened: std::sync::atomic::AtomicBool::new(false),
            inner: KeywordReasoner::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        self.opened.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl Reasoner for GatedReasoner {
    async fn next_action(&self, trace: &ReactTrace) -> Result<Action, AgentError> {
        let notified = self.gate.notified();
        if !self.opened.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            notified.await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.next_action(trace).await
    }
}

pub struct FixedPlanner;

#[async_trait]
impl PlanGenerator for FixedPlanner {
    async fn generate(&self, _question: &Question) -> Result<ReasoningPlan, AgentError> {
        Ok(ReasoningPlan::new(vec![
            ReasoningStep {
                name: "CountLetters".into(),
                description: "Count the letters".into(),
            },
            ReasoningStep {
                name: "Arithmetic".into(),
                description: "Do the arithmetic".into(),
            },
        ]))
    }
}

pub struct FailingPlanner;

#[async_trait]
impl PlanGenerator for FailingPlanner {
    async fn generate(&self, _question: &Question) -> Result<ReasoningPlan, AgentError> {
        Err(AgentError::LlmError("planner offline".into()))
    }
}

/// 固定返回给定提案；重新分解时追加 " (refined)"
pub struct StubDecomposer {
    proposals: Vec<Proposal>,
    pub redecompositions: AtomicUsize,
}

impl StubDecomposer {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            proposals: texts
                .iter()
                .enumerate()
                .map(|(i, t)| Proposal::for_step(*t, i))
                .collect(),
            redecompositions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Decomposer for StubDecomposer {
    async fn decompose(&self, _question: &Question, _plan: &ReasoningPlan) -> Result<Vec<Proposal>, AgentError> {
        Ok(self.proposals.clone())
    }

    async fn redecompose(
        &self,
        _question: &Question,
        _plan: &ReasoningPlan,
        rejected: &SubQuestion,
        _feedback: &str,
    ) -> Result<Vec<Proposal>, AgentError> {
        self.redecompositions.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Proposal::for_step(format!("{} (refined)", rejected.text), rejected.plan_step)])
    }
}

pub struct AcceptAll;

#[async_trait]
impl Refiner for AcceptAll {
    async fn refine(
        &self,
        _question: &Question,
        _plan: &ReasoningPlan,
        candidates: Vec<SubQuestion>,
    ) -> Result<RefineOutcome, AgentError> {
        Ok(RefineOutcome {
            accepted: candidates,
            needs_work: Vec::new(),
        })
    }
}

/// 永远不满意
pub struct NeverSatisfied;

#[async_trait]
impl Refiner for NeverSatisfied {
    async fn refine(
        &self,
        _question: &Question,
        _plan: &ReasoningPlan,
        candidates: Vec<SubQuestion>,
    ) -> Result<RefineOutcome, AgentError> {
        Ok(RefineOutcome {
            accepted: Vec::new(),
            needs_work: candidates.into_iter().map(|c| (c, "too vague".to_string())).collect(),
        })
    }
}

/// 把已解决子答案的数值相乘，并引用全部标记
pub struct MultiplyingSynthesizer;

#[async_trait]
impl Synthesizer for MultiplyingSynthesizer {
    async fn synthesize(
        &self,
        _question: &Question,
        _plan: &ReasoningPlan,
        sections: &[Section],
    ) -> Result<String, AgentError> {
        let resolved: Vec<&Section> = sections.iter().filter(|s| s.resolved).collect();
        let product: i64 = resolved
            .iter()
            .filter_map(|s| s.answer_text.trim().parse::<i64>().ok())
            .product();
        let markers: Vec<String> = resolved.iter().flat_map(|s| s.markers.clone()).collect();
        Ok(format!("The answer is {product} {}", markers.join("")))
    }
}

pub struct FailingSynthesizer;

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    async fn synthesize(
        &self,
        _question: &Question,
        _plan: &ReasoningPlan,
        _sections: &[Section],
    ) -> Result<String, AgentError> {
        Err(AgentError::LlmError("synthesis backend down".into()))
    }
}

/// 收集所有事件
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RunEventSink for CollectingSink {
    fn emit(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn tools() -> Arc<ToolExecutor> {
    Arc::new(ToolExecutor::new(
        builtin_registry(&["arithmetic".into(), "string".into(), "datetime".into()]),
        5,
    ))
}

pub struct Pipeline {
    pub planner: Arc<dyn PlanGenerator>,
    pub decomposer: Arc<dyn Decomposer>,
    pub refiner: Arc<dyn Refiner>,
    pub reasoner: Arc<dyn Reasoner>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub step_budget: usize,
    pub max_iterations: usize,
}

impl Pipeline {
    pub fn new(reasoner: Arc<dyn Reasoner>, sub_questions: &[&str]) -> Self {
        Self {
            planner: Arc::new(FixedPlanner),
            decomposer: Arc::new(StubDecomposer::new(sub_questions)),
            refiner: Arc::new(AcceptAll),
            reasoner,
            synthesizer: Arc::new(MultiplyingSynthesizer),
            step_budget: 5,
            max_iterations: 3,
        }
    }

    pub fn build(self) -> Orchestrator {
        let executor = ReactExecutor::new(self.reasoner, tools()).with_step_budget(self.step_budget);
        Orchestrator::new(
            self.planner,
            DecompositionLoop::new(self.decomposer, self.refiner, self.max_iterations),
            Arc::new(executor),
            Consolidator::new(self.synthesizer),
        )
    }
}

/// 包装 LocalTransport；接下来的 N 次投递以传输错误失败
pub struct FlakyTransport {
    inner: LocalTransport,
    failures_left: AtomicUsize,
    pub deliveries: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: LocalTransport::new(timeout),
            failures_left: AtomicUsize::new(0),
            deliveries: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn deliver(&self, target: &ActorRef, method: ActorMethod) -> Result<ActorReply, DispatchError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DispatchError::Transport(format!("injected fault for {}", target.run_id())));
        }
        self.inner.deliver(target, method).await
    }
}
