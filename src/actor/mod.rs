//! Actor 运行时：每个 run 一个 actor，方法投递带重试，生命周期事件经 pub/sub 到达并做过期过滤

pub mod pubsub;
pub mod retry;
pub mod run_actor;
pub mod runtime;
pub mod store;
pub mod transport;

pub use pubsub::{Envelope, EventBus, StalenessWindow, TopicPublisher};
pub use retry::RetryPolicy;
pub use run_actor::{ActorRef, ActorSettings, RunActor};
pub use runtime::{ActorRuntime, RuntimeSettings};
pub use store::{MemoryStateStore, StateStore, StoreError};
pub use transport::{ActorMethod, ActorReply, LocalTransport, RunResult, Transport};
