//! Actor 方法调用的重试策略
//!
//! 所有 actor 调用共用同一个 RetryPolicy；只重试投递层面的瞬时故障（超时、传输错误），
//! 业务上的否定结果不重试。

use std::future::Future;
use std::time::Duration;

use crate::core::DispatchError;

/// 固定间隔重试；`max_attempts` 为总尝试次数（含首次）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// 第 `attempt` 次（从 1 开始）失败后是否还能再试
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// 按策略执行 `op`；`op` 收到当前尝试序号（从 1 开始）
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, DispatchError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if self.should_retry(attempt) => {
                    tracing::warn!(attempt, max_attempts = self.max_attempts, error = %e, "actor call failed, retrying");
                    if !self.interval.is_zero() {
                        tokio::time::sleep(self.interval).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DispatchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
            }
        }
    }
}
