//! Actor 方法投递
//!
//! Transport 只负责把一次方法调用送到 actor 并取回回复；重试由运行时按 RetryPolicy 统一处理。

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::actor::run_actor::{ActorMessage, ActorRef};
use crate::core::DispatchError;
use crate::workflow::{FinalAnswer, RunFailure, RunPhase, RunState};

/// Run actor 对外暴露的方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorMethod {
    Start,
    GetStatus,
    GetResult,
    Cancel,
}

/// getResult 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Ready(FinalAnswer),
    Failed(RunFailure),
    Pending { phase: RunPhase },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActorReply {
    /// false 表示重复 Start 或只读 actor
    Started(bool),
    Status(Box<RunState>),
    Result(RunResult),
    /// false 表示 run 已结束
    Cancelled(bool),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: &ActorRef, method: ActorMethod) -> Result<ActorReply, DispatchError>;
}

/// 进程内投递：mailbox + oneshot 回复，带调用超时
pub struct LocalTransport {
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(&self, target: &ActorRef, method: ActorMethod) -> Result<ActorReply, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let call = async {
            target
                .mailbox()
                .send(ActorMessage::Call {
                    method,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| DispatchError::Transport(format!("mailbox of {} is closed", target.run_id())))?;
            reply_rx
                .await
                .map_err(|_| DispatchError::Transport(format!("{} dropped the reply", target.run_id())))?
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))?
    }
}
