//! Actor 运行时：run 目录、方法投递与重试、归档重建
//!
//! 每个 run 一个 actor；同一 run 的调用在其 mailbox 中串行执行，不同 run 互不影响。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::actor::pubsub::{EventBus, StalenessWindow};
use crate::actor::retry::RetryPolicy;
use crate::actor::run_actor::{ActorRef, ActorSettings, RunActor};
use crate::actor::store::StateStore;
use crate::actor::transport::{ActorMethod, ActorReply, LocalTransport, RunResult, Transport};
use crate::core::DispatchError;
use crate::workflow::{ExecutionMode, Orchestrator, Question, RunEvent, RunId, RunState};

#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub retry: RetryPolicy,
    pub staleness: StalenessWindow,
    pub invoke_timeout: Duration,
    pub mailbox_capacity: usize,
    pub idle_timeout: Duration,
    pub default_mode: ExecutionMode,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            staleness: StalenessWindow::default(),
            invoke_timeout: Duration::from_secs(10),
            mailbox_capacity: 64,
            idle_timeout: Duration::from_secs(600),
            default_mode: ExecutionMode::Sequential,
        }
    }
}

impl RuntimeSettings {
    fn actor_settings(&self) -> ActorSettings {
        ActorSettings {
            staleness: self.staleness,
            idle_timeout: self.idle_timeout,
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

pub struct ActorRuntime {
    actors: RwLock<HashMap<RunId, ActorRef>>,
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus<RunEvent>>,
    transport: Arc<dyn Transport>,
    settings: RuntimeSettings,
}

impl ActorRuntime {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn StateStore>, settings: RuntimeSettings) -> Self {
        Self {
            actors: RwLock::new(HashMap::new()),
            orchestrator,
            store,
            bus: Arc::new(EventBus::new(settings.mailbox_capacity.max(16) * 4)),
            transport: Arc::new(LocalTransport::new(settings.invoke_timeout)),
            settings,
        }
    }

    /// 替换投递层（如测试中注入故障）
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn bus(&self) -> Arc<EventBus<RunEvent>> {
        self.bus.clone()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// 仍在运行的 actor 数；顺带清理已停用的条目
    pub async fn active_count(&self) -> usize {
        let mut actors = self.actors.write().await;
        prune(&mut actors);
        actors.len()
    }

    /// 创建 run actor 并启动工作流；`mode` 为空时使用默认执行方式
    pub async fn submit(&self, question: Question, mode: Option<ExecutionMode>) -> Result<RunId, DispatchError> {
        let run_id = format!("run_{}", uuid::Uuid::new_v4());
        let state = RunState::new(run_id.clone(), question, mode.unwrap_or(self.settings.default_mode));
        let actor = RunActor::spawn(
            state,
            Some(self.orchestrator.clone()),
            self.bus.clone(),
            self.store.clone(),
            self.settings.actor_settings(),
        );
        {
            let mut actors = self.actors.write().await;
            prune(&mut actors);
            actors.insert(run_id.clone(), actor);
        }
        tracing::info!(%run_id, "run submitted");

        self.invoke(&run_id, ActorMethod::Start).await?;
        Ok(run_id)
    }

    /// 投递一次方法调用；瞬时故障按 RetryPolicy 重试，重试耗尽时该 run 以可重试失败结束
    pub async fn invoke(&self, run_id: &str, method: ActorMethod) -> Result<ActorReply, DispatchError> {
        let result = self
            .settings
            .retry
            .run(move |attempt| async move {
                let actor = self.locate(run_id).await?;
                tracing::debug!(%run_id, attempt, ?method, "dispatching actor call");
                self.transport.deliver(&actor, method).await
            })
            .await;

        if let Err(e @ DispatchError::Exhausted { .. }) = &result {
            tracing::warn!(%run_id, ?method, error = %e, "actor call exhausted retries");
            let actor = self.actors.read().await.get(run_id).cloned();
            if let Some(actor) = actor {
                if !actor.abort(format!("dispatch failed: {e}"), self.settings.invoke_timeout).await {
                    tracing::warn!(%run_id, alive = actor.is_alive(), "abort notice not delivered to run actor");
                }
            }
        }
        result
    }

    /// 查找 run actor；已停用的从归档只读重建
    async fn locate(&self, run_id: &str) -> Result<ActorRef, DispatchError> {
        if let Some(actor) = self.actors.read().await.get(run_id) {
            if actor.is_alive() {
                return Ok(actor.clone());
            }
        }

        let mut actors = self.actors.write().await;
        match actors.get(run_id) {
            Some(actor) if actor.is_alive() => return Ok(actor.clone()),
            Some(_) => {
                actors.remove(run_id);
            }
            None => {}
        }
        let state = self
            .store
            .load(run_id)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?
            .ok_or_else(|| DispatchError::NotFound(run_id.to_string()))?;
        let actor = RunActor::spawn(
            state,
            None,
            self.bus.clone(),
            self.store.clone(),
            self.settings.actor_settings(),
        );
        actors.insert(run_id.to_string(), actor.clone());
        tracing::info!(%run_id, "run actor re-activated from archive");
        Ok(actor)
    }

    pub async fn status(&self, run_id: &str) -> Result<RunState, DispatchError> {
        match self.invoke(run_id, ActorMethod::GetStatus).await? {
            ActorReply::Status(state) => Ok(*state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn result(&self, run_id: &str) -> Result<RunResult, DispatchError> {
        match self.invoke(run_id, ActorMethod::GetResult).await? {
            ActorReply::Result(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// 取消 run；只影响该 run 的执行
    pub async fn cancel(&self, run_id: &str) -> Result<bool, DispatchError> {
        match self.invoke(run_id, ActorMethod::Cancel).await? {
            ActorReply::Cancelled(cancelled) => Ok(cancelled),
            other => Err(unexpected(other)),
        }
    }
}

/// 移除已停用 actor 的条目；归档仍在 StateStore 中，需要时重建
fn prune(actors: &mut HashMap<RunId, ActorRef>) {
    let before = actors.len();
    actors.retain(|_, actor| actor.is_alive());
    if actors.len() < before {
        tracing::debug!(removed = before - actors.len(), "pruned deactivated run actors");
    }
}

fn unexpected(reply: ActorReply) -> DispatchError {
    DispatchError::Rejected(format!("unexpected actor reply: {reply:?}"))
}
