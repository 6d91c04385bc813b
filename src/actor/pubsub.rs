//! 进程内 pub/sub：按主题的 broadcast 通道 + 带时间戳的信封
//!
//! 每个 run 一个主题；消费方在投递时检查事件年龄，超过 StalenessWindow 的直接丢弃。
//! 同一事件可能被重复投递，消费方须幂等。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::workflow::{RunEvent, RunEventSink};

/// 带发布时间的事件
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub topic: String,
    pub published_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(topic: impl Into<String>, payload: T) -> Self {
        Self {
            topic: topic.into(),
            published_at: Utc::now(),
            payload,
        }
    }

    /// 指定发布时间（回放 / 测试）
    pub fn at(topic: impl Into<String>, published_at: DateTime<Utc>, payload: T) -> Self {
        Self {
            topic: topic.into(),
            published_at,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessWindow(Duration);

impl Default for StalenessWindow {
    fn default() -> Self {
        Self(Duration::from_secs(60))
    }
}

impl StalenessWindow {
    pub fn new(window: Duration) -> Self {
        Self(window)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// 事件年龄（时钟回拨时为 0）
    pub fn age(published_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        (now - published_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// 在 `now` 投递时是否仍然新鲜
    pub fn admits(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        Self::age(published_at, now) <= self.0
    }
}

/// 按主题分发的事件总线
pub struct EventBus<T> {
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope<T>>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// run 的生命周期事件主题
    pub fn topic_for(run_id: &str) -> String {
        format!("topic-RunActor-{run_id}-events")
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope<T>> {
        if let Some(tx) = self.topics.read().unwrap_or_else(|e| e.into_inner()).get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope<T>> {
        self.sender(topic).subscribe()
    }

    /// 以当前时间发布；返回收到事件的订阅者数
    pub fn publish(&self, topic: &str, payload: T) -> usize {
        self.publish_envelope(Envelope::new(topic, payload))
    }

    pub fn publish_envelope(&self, envelope: Envelope<T>) -> usize {
        let topic = envelope.topic.clone();
        match self.sender(&topic).send(envelope) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!(%topic, "event published without subscribers");
                0
            }
        }
    }

    pub fn remove_topic(&self, topic: &str) {
        self.topics.write().unwrap_or_else(|e| e.into_inner()).remove(topic);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// 将编排器的事件发布到一个主题
pub struct TopicPublisher {
    bus: Arc<EventBus<RunEvent>>,
    topic: String,
}

impl TopicPublisher {
    pub fn new(bus: Arc<EventBus<RunEvent>>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl RunEventSink for TopicPublisher {
    fn emit(&self, event: RunEvent) {
        self.bus.publish(&self.topic, event);
    }
}
