//! 归档存储：run 进入终态后保存 RunState 快照，actor 停用后可据此只读重建

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::workflow::RunState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &RunState) -> Result<(), StoreError>;
    async fn load(&self, run_id: &str) -> Result<Option<RunState>, StoreError>;
}

/// 进程内实现：以 JSON 快照保存，load 得到的是独立副本
#[derive(Default)]
pub struct MemoryStateStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.snapshots.write().await.insert(state.run_id().to_string(), json);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, StoreError> {
        match self.snapshots.read().await.get(run_id) {
            Some(json) => serde_json::from_str(json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}
