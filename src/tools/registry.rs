//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! 参数与结果均为 JSON 对象（argsMap / resultMap），失败统一为类型化的 ToolError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// 工具参数（JSON 对象）
pub type ToolArgs = Map<String, Value>;
/// 工具结果（JSON 对象）
pub type ToolOutput = Map<String, Value>;

/// 工具调用失败；不会穿透 ReAct 执行器，而是作为 Observation 回灌给推理
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool {0} does not exist")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Execution { tool: String, reason: String },

    #[error("Tool {0} timed out")]
    Timeout(String),

    #[error("Tool {tool} is unavailable: {reason}")]
    Unavailable { tool: String, reason: String },
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolOutput, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具后注册者覆盖先注册者
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args).await
    }

    /// 按名称排序，保证 prompt 稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 生成工具 schema JSON（name / description / parameters），用于 ReAct system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| (name, t)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

/// 读取数值参数；接受数字或可解析为数字的字符串
pub(crate) fn number_arg(tool: &str, args: &ToolArgs, key: &str) -> Result<f64, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };
    match args.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("'{key}' is not a finite number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(format!("'{key}' is not a number: {s}"))),
        Some(other) => Err(invalid(format!("'{key}' must be a number, got {other}"))),
        None => Err(invalid(format!("missing '{key}'"))),
    }
}

pub(crate) fn string_arg<'a>(tool: &str, args: &'a ToolArgs, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing string '{key}'"),
        })
}

/// 单值结果统一包装为 {"result": value}
pub(crate) fn single_result(value: impl Into<Value>) -> ToolOutput {
    let mut out = Map::new();
    out.insert("result".to_string(), value.into());
    out
}

/// 整数值的浮点结果按整数输出（7.0 -> 7），其余保持浮点
pub(crate) fn number_value(x: f64) -> Value {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        serde_json::Number::from_f64(x)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CountSubstringsTool;

    #[tokio::test]
    async fn test_unknown_tool_is_typed_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("web_search", &ToolArgs::new()).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("web_search".to_string()));
        assert_eq!(err.to_string(), "Tool web_search does not exist");
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(CountSubstringsTool);
        assert_eq!(registry.tool_names(), vec!["count_substrings".to_string()]);

        let args = serde_json::json!({"string": "strawberry", "substring": "r"});
        let out = registry
            .execute("count_substrings", args.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(out.get("result"), Some(&Value::from(3)));
        assert!(registry.to_schema_json().contains("count_substrings"));
    }

    #[test]
    fn test_number_arg_accepts_numeric_strings() {
        let args = serde_json::json!({"a": 3, "b": "4.5", "c": true});
        let args = args.as_object().unwrap();
        assert_eq!(number_arg("t", args, "a").unwrap(), 3.0);
        assert_eq!(number_arg("t", args, "b").unwrap(), 4.5);
        assert!(matches!(
            number_arg("t", args, "c"),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(number_arg("t", args, "missing").is_err());
    }

    #[test]
    fn test_number_value_prefers_integers() {
        assert_eq!(number_value(7.0), Value::from(7));
        assert_eq!(number_value(2.5), serde_json::json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }
}
