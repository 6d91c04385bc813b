//! Run actor：每个 run 一个任务，独占该 run 的 RunState
//!
//! 所有修改都在 actor 任务内完成：方法调用经 mailbox 串行处理，
//! 编排器的生命周期事件经 pub/sub 主题到达并按 StalenessWindow 过滤。
//! 归档后的 actor 空闲超过 idle_timeout 即停用，之后可从 StateStore 只读重建。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::actor::pubsub::{Envelope, EventBus, StalenessWindow, TopicPublisher};
use crate::actor::store::StateStore;
use crate::actor::transport::{ActorMethod, ActorReply, RunResult};
use crate::core::{AgentError, DispatchError};
use crate::workflow::{
    Orchestrator, ReasoningPlan, RunEvent, RunFailure, RunId, RunItem, RunState, WorkflowFailure, WorkflowOutcome,
};

/// Actor mailbox 中的消息
pub enum ActorMessage {
    Call {
        method: ActorMethod,
        reply: oneshot::Sender<Result<ActorReply, DispatchError>>,
    },
    /// 编排器驱动任务结束
    Finished(Box<Result<WorkflowOutcome, WorkflowFailure>>),
    /// 运行时判定投递失败，run 以可重试失败结束
    Abort(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ActorSettings {
    pub staleness: StalenessWindow,
    pub idle_timeout: Duration,
    pub mailbox_capacity: usize,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            staleness: StalenessWindow::default(),
            idle_timeout: Duration::from_secs(600),
            mailbox_capacity: 64,
        }
    }
}

/// Actor 地址
#[derive(Debug, Clone)]
pub struct ActorRef {
    run_id: RunId,
    mailbox: mpsc::Sender<ActorMessage>,
}

impl ActorRef {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn mailbox(&self) -> &mpsc::Sender<ActorMessage> {
        &self.mailbox
    }

    /// actor 任务仍在运行
    pub fn is_alive(&self) -> bool {
        !self.mailbox.is_closed()
    }

    /// 不经 Transport 直接投递失败通知；mailbox 已满时最多等待 `wait`，返回是否送达
    pub async fn abort(&self, reason: impl Into<String>, wait: Duration) -> bool {
        match self.mailbox.try_send(ActorMessage::Abort(reason.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                matches!(tokio::time::timeout(wait, self.mailbox.send(msg)).await, Ok(Ok(())))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

pub struct RunActor {
    state: RunState,
    /// None 表示从归档重建的只读 actor
    orchestrator: Option<Arc<Orchestrator>>,
    bus: Arc<EventBus<RunEvent>>,
    topic: String,
    store: Arc<dyn StateStore>,
    settings: ActorSettings,
    cancel: CancellationToken,
    started: bool,
    self_tx: mpsc::Sender<ActorMessage>,
}

impl RunActor {
    /// 订阅 run 主题后启动 actor 任务
    pub fn spawn(
        state: RunState,
        orchestrator: Option<Arc<Orchestrator>>,
        bus: Arc<EventBus<RunEvent>>,
        store: Arc<dyn StateStore>,
        settings: ActorSettings,
    ) -> ActorRef {
        let run_id = state.run_id().to_string();
        let topic = EventBus::<RunEvent>::topic_for(&run_id);
        let events = bus.subscribe(&topic);
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity.max(1));

        let actor = RunActor {
            state,
            orchestrator,
            bus,
            topic,
            store,
            settings,
            cancel: CancellationToken::new(),
            started: false,
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run(rx, events));

        ActorRef { run_id, mailbox: tx }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<ActorMessage>, mut events: broadcast::Receiver<Envelope<RunEvent>>) {
        let run_id = self.state.run_id().to_string();
        let mut events_open = true;
        tracing::debug!(%run_id, read_only = self.orchestrator.is_none(), "run actor started");

        loop {
            let archived = self.state.is_archived();
            tokio::select! {
                msg = mailbox.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                ev = events.recv(), if events_open && !archived => match ev {
                    Ok(envelope) => {
                        self.on_event(envelope);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%run_id, skipped, "run actor lagged behind its event topic");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
                _ = tokio::time::sleep(self.settings.idle_timeout), if archived => {
                    tracing::info!(%run_id, "idle archived run actor deactivated");
                    break;
                }
            }
        }
        self.bus.remove_topic(&self.topic);
    }

    /// 应用一条事件；过期或无效的事件被丢弃
    fn on_event(&mut self, envelope: Envelope<RunEvent>) -> bool {
        let now = Utc::now();
        if !self.settings.staleness.admits(envelope.published_at, now) {
            let age = StalenessWindow::age(envelope.published_at, now);
            tracing::debug!(
                run_id = %self.state.run_id(),
                age_ms = age.as_millis() as u64,
                "dropping stale event"
            );
            return false;
        }
        match envelope.payload.apply(&mut self.state) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::debug!(run_id = %self.state.run_id(), error = %e, "event ignored");
                false
            }
        }
    }

    async fn handle(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Call { method, reply } => {
                let result = self.call(method).await;
                let _ = reply.send(result);
            }
            ActorMessage::Finished(result) => self.finish(*result).await,
            ActorMessage::Abort(reason) => {
                if self.state.is_archived() {
                    return;
                }
                self.cancel.cancel();
                tracing::warn!(run_id = %self.state.run_id(), %reason, "run aborted");
                self.archive_failure(RunFailure {
                    reason,
                    retryable: true,
                })
                .await;
            }
        }
    }

    async fn call(&mut self, method: ActorMethod) -> Result<ActorReply, DispatchError> {
        match method {
            ActorMethod::Start => Ok(ActorReply::Started(self.start())),
            ActorMethod::GetStatus => Ok(ActorReply::Status(Box::new(self.state.clone()))),
            ActorMethod::GetResult => Ok(ActorReply::Result(self.result())),
            ActorMethod::Cancel => {
                if self.state.is_archived() {
                    return Ok(ActorReply::Cancelled(false));
                }
                self.cancel.cancel();
                if !self.started {
                    self.archive_failure(RunFailure {
                        reason: "cancelled".into(),
                        retryable: false,
                    })
                    .await;
                }
                tracing::info!(run_id = %self.state.run_id(), "run cancellation requested");
                Ok(ActorReply::Cancelled(true))
            }
        }
    }

    fn result(&self) -> RunResult {
        if let Some(answer) = self.state.final_answer() {
            RunResult::Ready(answer.clone())
        } else if let Some(failure) = self.state.failure() {
            RunResult::Failed(failure.clone())
        } else {
            RunResult::Pending {
                phase: self.state.phase(),
            }
        }
    }

    /// 启动编排；重复调用无副作用
    fn start(&mut self) -> bool {
        let orchestrator = match &self.orchestrator {
            Some(o) if !self.started && !self.state.is_archived() => o.clone(),
            _ => return false,
        };
        self.started = true;

        let question = self.state.question().clone();
        let mode = self.state.mode();
        let sink = Arc::new(TopicPublisher::new(self.bus.clone(), self.topic.clone()));
        let cancel = self.cancel.clone();
        let tx = self.self_tx.clone();
        let run_id = self.state.run_id().to_string();
        tracing::info!(%run_id, ?mode, "run started");

        tokio::spawn(async move {
            let result = orchestrator.run(&question, mode, sink, cancel).await;
            if tx.send(ActorMessage::Finished(Box::new(result))).await.is_err() {
                tracing::warn!(%run_id, "run actor gone before workflow finished");
            }
        });
        true
    }

    /// 以编排器的返回值补齐状态（事件可能尚未到达或已过期），然后落定
    fn reconcile(&mut self, plan: Option<ReasoningPlan>, items: &[RunItem]) {
        if let Some(plan) = plan {
            let _ = self.state.set_plan(plan);
        }
        if !items.is_empty() {
            let _ = self
                .state
                .set_sub_questions(items.iter().map(|i| i.sub_question.clone()).collect());
        }
        for item in items.iter().filter(|i| i.answer.is_terminal()) {
            let _ = self.state.record_answer(item.sub_question.position, item.answer.clone());
        }
    }

    async fn finish(&mut self, result: Result<WorkflowOutcome, WorkflowFailure>) {
        if self.state.is_archived() {
            tracing::debug!(run_id = %self.state.run_id(), "workflow result after archive ignored");
            return;
        }
        match result {
            Ok(outcome) => {
                self.reconcile(Some(outcome.plan), &outcome.items);
                match self.state.finalize(outcome.final_answer) {
                    Ok(()) => {
                        tracing::info!(run_id = %self.state.run_id(), "run done");
                        self.persist().await;
                    }
                    Err(e) => {
                        tracing::warn!(run_id = %self.state.run_id(), error = %e, "final answer rejected");
                        self.archive_failure(RunFailure {
                            reason: format!("final answer rejected: {e}"),
                            retryable: false,
                        })
                        .await;
                    }
                }
            }
            Err(failure) => {
                self.reconcile(failure.plan, &failure.items);
                let reason = match failure.error {
                    AgentError::Cancelled => "cancelled".to_string(),
                    e => format!("{:?} failed: {e}", failure.phase),
                };
                tracing::warn!(run_id = %self.state.run_id(), %reason, "run failed");
                self.archive_failure(RunFailure {
                    reason,
                    retryable: false,
                })
                .await;
            }
        }
    }

    async fn archive_failure(&mut self, failure: RunFailure) {
        if let Err(e) = self.state.fail(failure) {
            tracing::debug!(run_id = %self.state.run_id(), error = %e, "run already archived");
            return;
        }
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.state).await {
            tracing::error!(run_id = %self.state.run_id(), error = %e, "failed to archive run state");
        }
    }
}
