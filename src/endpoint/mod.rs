//! Agent 协议端点：submit / getStatus / getResult / cancel
//!
//! 与传输无关的门面；HTTP 绑定见 `http` 模块（feature `server`）。

#[cfg(feature = "server")]
pub mod http;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::{ActorRuntime, RunResult};
use crate::core::DispatchError;
use crate::workflow::{ExecutionMode, FinalAnswer, Progress, Question, ReasoningPlan, RunFailure, RunId, RunItem, RunPhase};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub question: String,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub run_id: RunId,
}

/// getStatus 的返回：阶段、进度与部分结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub run_id: RunId,
    pub question: String,
    pub mode: ExecutionMode,
    pub phase: RunPhase,
    pub progress: Progress,
    pub plan: Option<ReasoningPlan>,
    pub items: Vec<RunItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub has_final_answer: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {run_id} has not finished (phase {phase:?})")]
    NotFinished { run_id: RunId, phase: RunPhase },

    #[error("run failed: {}", .0.reason)]
    RunFailed(RunFailure),

    #[error(transparent)]
    Dispatch(DispatchError),
}

impl EndpointError {
    /// 调用方重新提交是否可能成功
    pub fn retryable(&self) -> bool {
        match self {
            EndpointError::RunFailed(f) => f.retryable,
            EndpointError::Dispatch(e) => e.is_retryable(),
            EndpointError::NotFinished { .. } => true,
            _ => false,
        }
    }
}

impl From<DispatchError> for EndpointError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(run_id) => EndpointError::NotFound(run_id),
            other => EndpointError::Dispatch(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCapabilities {
    pub streaming: bool,
}

/// 对外公开的 agent 描述
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<AgentSkill>,
}

fn skill(name: &str, description: &str, examples: &[&str]) -> AgentSkill {
    AgentSkill {
        id: format!("{name}_skill"),
        name: name.to_string(),
        description: description.to_string(),
        tags: vec![name.to_string()],
        examples: examples.iter().map(|e| e.to_string()).collect(),
    }
}

/// `url` 为服务的对外地址
pub fn agent_card(url: &str) -> AgentCard {
    AgentCard {
        name: "Multi-Hop Question Answering Agent".to_string(),
        description: "Answers multi-hop questions by decomposing them into sub-questions, \
                      solving each with tools and consolidating a cited answer."
            .to_string(),
        url: url.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_input_modes: vec!["application/json".to_string()],
        default_output_modes: vec!["application/json".to_string()],
        capabilities: AgentCapabilities { streaming: false },
        skills: vec![
            skill(
                "submit",
                "Starts answering a multi-hop question and returns a run id.",
                &["What is (number of letter r in 'strawberry') times (3+4)?"],
            ),
            skill("status", "Reports the phase, progress and partial results of a run.", &[]),
            skill("result", "Returns the cited final answer of a finished run.", &[]),
            skill("cancel", "Cancels an unfinished run.", &[]),
        ],
    }
}

pub struct AgentEndpoint {
    runtime: Arc<ActorRuntime>,
}

impl AgentEndpoint {
    pub fn new(runtime: Arc<ActorRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, EndpointError> {
        let text = request.question.trim();
        if text.is_empty() {
            return Err(EndpointError::InvalidRequest("question must not be empty".into()));
        }
        let run_id = self.runtime.submit(Question::new(text), request.mode).await?;
        Ok(SubmitResponse { run_id })
    }

    pub async fn get_status(&self, run_id: &str) -> Result<StatusView, EndpointError> {
        let state = self.runtime.status(run_id).await?;
        Ok(StatusView {
            run_id: state.run_id().to_string(),
            question: state.question().text.clone(),
            mode: state.mode(),
            phase: state.phase(),
            progress: state.progress().clone(),
            plan: state.plan().cloned(),
            items: state.items().to_vec(),
            failure: state.failure().cloned(),
            has_final_answer: state.final_answer().is_some(),
            created_at: state.created_at(),
            updated_at: state.updated_at(),
        })
    }

    /// Done 之后重复调用返回同一个 FinalAnswer
    pub async fn get_result(&self, run_id: &str) -> Result<FinalAnswer, EndpointError> {
        match self.runtime.result(run_id).await? {
            RunResult::Ready(answer) => Ok(answer),
            RunResult::Failed(failure) => Err(EndpointError::RunFailed(failure)),
            RunResult::Pending { phase } => Err(EndpointError::NotFinished {
                run_id: run_id.to_string(),
                phase,
            }),
        }
    }

    pub async fn cancel(&self, run_id: &str) -> Result<bool, EndpointError> {
        Ok(self.runtime.cancel(run_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_retryability() {
        let exhausted = DispatchError::Exhausted {
            attempts: 3,
            last: Box::new(DispatchError::Timeout(Duration::from_secs(10))),
        };
        assert!(EndpointError::from(exhausted).retryable());
        assert_eq!(
            EndpointError::from(DispatchError::NotFound("run_x".into())),
            EndpointError::NotFound("run_x".into())
        );
        assert!(!EndpointError::RunFailed(RunFailure {
            reason: "cancelled".into(),
            retryable: false
        })
        .retryable());
    }

    #[test]
    fn test_agent_card_lists_skills() {
        let card = agent_card("http://127.0.0.1:32770/");
        let names: Vec<&str> = card.skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["submit", "status", "result", "cancel"]);
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["defaultInputModes"][0], "application/json");
        assert!(json["skills"][1].get("examples").is_none());
    }
}
