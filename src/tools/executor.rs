//! 工具执行器（Tool Invoker）
//!
//! 持有 ToolRegistry 与全局超时，invoke(tool_name, args) 在超时内调用 registry.execute，
//! 超时转为 ToolError::Timeout；每次调用输出结构化审计日志（JSON）。
//! 执行器是跨 run 共享的外部服务，不做任何 run 级加锁。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::{ToolArgs, ToolError, ToolOutput, ToolRegistry};

const ARGS_PREVIEW_CHARS: usize = 200;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn invoke(&self, tool_name: &str, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let result = match timeout(self.timeout, self.registry.execute(tool_name, args)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::UnknownTool(_)) => "unknown_tool",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn schema_json(&self) -> String {
        self.registry.to_schema_json()
    }
}

fn args_preview(args: &ToolArgs) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
