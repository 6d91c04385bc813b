//! 工作流集成测试：规划 -> 分解 / 精炼 -> 执行 -> 合成

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use dqa::core::AgentError;
use dqa::workflow::{ExecutionMode, Question, RunEvent, RunPhase, SubAnswerStatus};
use tokio_util::sync::CancellationToken;

fn phases(events: &[RunEvent]) -> Vec<RunPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::PhaseChanged { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_strawberry_question_sequential() {
    let orchestrator = Pipeline::new(Arc::new(KeywordReasoner::new()), &[COUNT_R, ADD_3_4]).build();
    let sink = Arc::new(CollectingSink::default());

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            sink.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.final_answer.text.contains("21"));
    assert_eq!(outcome.final_answer.citations.len(), 2);
    assert!(outcome.final_answer.unresolved.is_empty());
    let tools: Vec<&str> = outcome.final_answer.citations.iter().map(|c| c.tool.as_str()).collect();
    assert_eq!(tools, vec!["count_substrings", "add"]);
    assert_eq!(outcome.items[0].answer.text, "3");
    assert_eq!(outcome.items[1].answer.text, "7");
    assert!(!outcome.plan.fallback);

    assert_eq!(
        phases(&sink.events()),
        vec![
            RunPhase::Planning,
            RunPhase::Decomposing,
            RunPhase::Refining,
            RunPhase::Executing,
            RunPhase::Consolidating,
        ]
    );
}

#[tokio::test]
async fn test_empty_decomposition_answers_original_question() {
    let orchestrator = Pipeline::new(Arc::new(KeywordReasoner::new()), &[]).build();

    let outcome = orchestrator
        .run(
            &Question::new("What is 2+2?"),
            ExecutionMode::Sequential,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].sub_question.text, "What is 2+2?");
    assert_eq!(outcome.items[0].answer.status, SubAnswerStatus::Succeeded);
    assert!(outcome.final_answer.text.contains("42"));
    assert!(outcome.final_answer.citations.is_empty());
}

#[tokio::test]
async fn test_budget_exhaustion_marks_only_that_sub_question_unresolved() {
    let mut pipeline = Pipeline::new(Arc::new(KeywordReasoner::new()), &[COUNT_R, NEVER_ENDS, ADD_3_4]);
    pipeline.step_budget = 3;
    let orchestrator = pipeline.build();

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let statuses: Vec<SubAnswerStatus> = outcome.items.iter().map(|i| i.answer.status).collect();
    assert_eq!(
        statuses,
        vec![SubAnswerStatus::Succeeded, SubAnswerStatus::Failed, SubAnswerStatus::Succeeded]
    );
    assert_eq!(outcome.items[1].answer.provenance.len(), 3);
    assert_eq!(outcome.final_answer.unresolved, vec![1]);
    assert!(outcome.final_answer.text.contains("could not be resolved"));
    assert!(outcome.final_answer.text.contains("21"));
    // 失败子问题的工具调用不进入引用
    assert_eq!(outcome.final_answer.citations.len(), 2);
}

#[tokio::test]
async fn test_sequential_context_carries_prior_answers() {
    let reasoner = Arc::new(KeywordReasoner::new());
    let orchestrator = Pipeline::new(reasoner.clone(), &[COUNT_R, ADD_3_4, "What is 2+2?"]).build();

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.items.len(), 3);

    assert!(reasoner.prior_answers_for(0).is_empty());
    let prior = reasoner.prior_answers_for(1);
    assert_eq!(prior.len(), 1);
    assert_eq!(prior[0].question, outcome.items[0].sub_question.text);
    assert_eq!(prior[0].answer, outcome.items[0].answer.text);

    // 第三个子问题按顺序看到前两个答案
    let prior = reasoner.prior_answers_for(2);
    let seen: Vec<(&str, &str)> = prior.iter().map(|p| (p.question.as_str(), p.answer.as_str())).collect();
    assert_eq!(seen, vec![(COUNT_R, "3"), (ADD_3_4, "7")]);

    let traces = reasoner.first_traces();
    assert!(traces.iter().all(|t| t.original_question() == Some(STRAWBERRY)));
}

#[tokio::test]
async fn test_parallel_sub_questions_are_isolated() {
    let reasoner = Arc::new(KeywordReasoner::new());
    let orchestrator = Pipeline::new(reasoner.clone(), &[COUNT_R, ADD_3_4]).build();

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Parallel,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let traces = reasoner.first_traces();
    assert_eq!(traces.len(), 2);
    assert!(traces.iter().all(|t| t.prior_answers().is_empty()));
    assert!(outcome.final_answer.text.contains("21"));
    assert_eq!(outcome.final_answer.citations.len(), 2);
}

#[tokio::test]
async fn test_refinement_cap_bounds_the_loop() {
    let decomposer = Arc::new(StubDecomposer::new(&[COUNT_R, ADD_3_4]));
    let mut pipeline = Pipeline::new(Arc::new(KeywordReasoner::new()), &[]);
    pipeline.decomposer = decomposer.clone();
    pipeline.refiner = Arc::new(NeverSatisfied);
    pipeline.max_iterations = 2;
    let orchestrator = pipeline.build();

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(decomposer.redecompositions.load(Ordering::SeqCst), 4);
    assert_eq!(outcome.items.len(), 2);
    assert!(outcome.items.iter().all(|i| i.sub_question.forced));
    assert!(outcome.items.iter().all(|i| i.sub_question.iteration <= 2));
    assert!(outcome.items[0].sub_question.text.ends_with("(refined) (refined)"));
    assert!(outcome.final_answer.text.contains("21"));
}

#[tokio::test]
async fn test_planning_failure_falls_back_to_trivial_plan() {
    let mut pipeline = Pipeline::new(Arc::new(KeywordReasoner::new()), &[COUNT_R, ADD_3_4]);
    pipeline.planner = Arc::new(FailingPlanner);
    let orchestrator = pipeline.build();
    let sink = Arc::new(CollectingSink::default());

    let outcome = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            sink.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.plan.fallback);
    assert_eq!(outcome.plan.len(), 1);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, RunEvent::PlanReady { plan } if plan.fallback)));
    assert!(outcome.final_answer.text.contains("21"));
}

#[tokio::test]
async fn test_consolidation_fault_fails_the_run() {
    let mut pipeline = Pipeline::new(Arc::new(KeywordReasoner::new()), &[COUNT_R, ADD_3_4]);
    pipeline.synthesizer = Arc::new(FailingSynthesizer);
    let orchestrator = pipeline.build();

    let failure = orchestrator
        .run(
            &Question::new(STRAWBERRY),
            ExecutionMode::Sequential,
            Arc::new(CollectingSink::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.phase, RunPhase::Consolidating);
    assert!(matches!(failure.error, AgentError::ConsolidationFailed(_)));
    assert_eq!(failure.items.len(), 2);
    assert!(failure.items.iter().all(|i| i.answer.is_terminal()));
}

#[tokio::test]
async fn test_cancel_during_execution_stops_pending_sub_questions() {
    let reasoner = Arc::new(GatedReasoner::new());
    let orchestrator = Arc::new(Pipeline::new(reasoner.clone(), &[COUNT_R, ADD_3_4]).build());
    let cancel = CancellationToken::new();

    let handle = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .run(
                    &Question::new(STRAWBERRY),
                    ExecutionMode::Parallel,
                    Arc::new(CollectingSink::default()),
                    cancel,
                )
                .await
        })
    };

    while reasoner.waiting.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let failure = handle.await.unwrap().unwrap_err();
    assert!(matches!(failure.error, AgentError::Cancelled));
    assert_eq!(failure.phase, RunPhase::Executing);
}
