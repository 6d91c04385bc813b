//! 问答工作流：数据模型、推理结构生成、分解 / 精炼、合成与编排

pub mod consolidate;
pub mod decompose;
pub mod engine;
pub mod plan;
pub mod types;

pub use consolidate::{Consolidator, LlmSynthesizer, Section, Synthesizer};
pub use decompose::{
    parse_proposals, Decomposer, Decomposition, DecompositionLoop, LlmDecomposer, LlmRefiner, Proposal,
    RefineOutcome, Refiner, SettledQuestions, DEFAULT_REFINEMENT_CRITERIA,
};
pub use engine::{NullSink, Orchestrator, RunEventSink, WorkflowFailure, WorkflowOutcome};
pub use plan::{generate_or_trivial, parse_plan, PlanGenerator, SelfDiscoverPlanner, DEFAULT_REASONING_MODULES};
pub use types::*;
