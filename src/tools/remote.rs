//! 远程工具注册表：`tools.registry_url` 指向一个 MCP 服务（Streamable HTTP 传输）
//!
//! 启动时完成 `initialize` 握手并通过 `tools/list` 发现工具；每个远程工具以
//! `tools/call` 代理执行。响应体可以是单个 JSON-RPC 对象，也可以是 SSE 流。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::tools::registry::single_result;
use crate::tools::{Tool, ToolArgs, ToolError, ToolOutput};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const REGISTRY: &str = "registry";

/// `tools/list` 返回的工具描述
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Option<Value>,
}

/// 一个 MCP 会话：共享 HTTP 客户端、会话 ID 与请求 ID 计数
pub struct McpSession {
    client: Client,
    url: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl McpSession {
    /// 建立会话：`initialize` 后发送 `notifications/initialized`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable(REGISTRY, e))?;
        let session = Self {
            client,
            url: url.trim().to_string(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "dqa", "version": env!("CARGO_PKG_VERSION") }
        });
        let result = session.request(REGISTRY, "initialize", params).await?;
        tracing::debug!(
            registry = %session.url,
            server = %result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            "mcp session initialized"
        );

        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        let response = session.post(REGISTRY, &notification).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(REGISTRY, format!("notifications/initialized returned {status}")));
        }
        Ok(session)
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, ToolError> {
        let result = self.request(REGISTRY, "tools/list", json!({})).await?;
        Ok(parse_list_tools_result(&result))
    }

    pub async fn call_tool(&self, name: &str, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let result = self
            .request(name, "tools/call", json!({ "name": name, "arguments": args }))
            .await?;
        parse_call_tool_result(name, &result)
    }

    async fn post(&self, tool: &str, body: &Value) -> Result<reqwest::Response, ToolError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("Mcp-Protocol-Version", PROTOCOL_VERSION)
            .json(body);
        if let Some(id) = self.session_id.lock().ok().and_then(|guard| guard.clone()) {
            request = request.header(SESSION_HEADER, id);
        }
        let response = request.send().await.map_err(|e| transport_error(tool, e))?;

        if let Some(id) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            if let Ok(mut guard) = self.session_id.lock() {
                *guard = Some(id.to_string());
            }
        }
        Ok(response)
    }

    /// 发送一个 JSON-RPC 请求，返回 `result`；`error` 映射为工具执行失败
    async fn request(&self, tool: &str, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response = self.post(tool, &body).await?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::NOT_FOUND {
            return Err(unavailable(tool, format!("{method} returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Execution {
                tool: tool.to_string(),
                reason: format!("{method} returned {status}: {text}"),
            });
        }

        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let text = response.text().await.map_err(|e| transport_error(tool, e))?;
        let message = parse_response_body(&text, content_type.as_ref()).map_err(|reason| ToolError::Execution {
            tool: tool.to_string(),
            reason: format!("{method}: {reason}"),
        })?;

        if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
            return Err(ToolError::Execution {
                tool: tool.to_string(),
                reason: error["message"].as_str().unwrap_or("unknown JSON-RPC error").to_string(),
            });
        }
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// 代理到 MCP 服务的工具
pub struct RemoteTool {
    spec: RemoteToolSpec,
    session: Arc<McpSession>,
}

impl RemoteTool {
    pub fn new(spec: RemoteToolSpec, session: Arc<McpSession>) -> Self {
        Self { spec, session }
    }
}

/// 连接注册表并列出全部远程工具
pub async fn discover(registry_url: &str, timeout: Duration) -> Result<Vec<RemoteTool>, ToolError> {
    let session = Arc::new(McpSession::connect(registry_url, timeout).await?);
    let specs = session.list_tools().await?;
    tracing::info!(registry = %registry_url, count = specs.len(), "remote tools discovered");
    Ok(specs
        .into_iter()
        .map(|spec| RemoteTool::new(spec, session.clone()))
        .collect())
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {}, "required": [] }))
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        self.session.call_tool(&self.spec.name, args).await
    }
}

/// 解析 HTTP 响应体：`application/json` 为单个消息；`text/event-stream` 取第一个带 result / error 的 data 事件
fn parse_response_body(body: &str, content_type: Option<&HeaderValue>) -> Result<Value, String> {
    let is_sse = content_type
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    if !is_sse {
        return serde_json::from_str(body).map_err(|e| format!("invalid JSON-RPC body: {e}"));
    }

    let is_response = |v: &Value| v.get("result").is_some() || v.get("error").is_some();
    let mut data = String::new();
    for line in body.lines().chain(std::iter::once("")) {
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            match serde_json::from_str::<Value>(&data) {
                Ok(message) if is_response(&message) => return Ok(message),
                _ => data.clear(),
            }
        }
    }
    Err("event stream carried no JSON-RPC response".to_string())
}

fn parse_list_tools_result(result: &Value) -> Vec<RemoteToolSpec> {
    result["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool["name"].as_str()?.to_string();
                    Some(RemoteToolSpec {
                        name,
                        description: tool["description"].as_str().unwrap_or_default().to_string(),
                        input_schema: tool.get("inputSchema").filter(|s| s.is_object()).cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `tools/call` 结果：`isError` 为执行失败；优先 `structuredContent`，否则拼接 text 块，
/// 文本若是 JSON 对象则直接作为输出，其它值包装为 {"result": ..}
fn parse_call_tool_result(tool: &str, result: &Value) -> Result<ToolOutput, ToolError> {
    let text = result["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result["isError"].as_bool().unwrap_or(false) {
        return Err(ToolError::Execution {
            tool: tool.to_string(),
            reason: if text.is_empty() { "tool reported an error".to_string() } else { text },
        });
    }

    if let Some(Value::Object(map)) = result.get("structuredContent") {
        return Ok(map.clone());
    }
    Ok(match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => map,
        Ok(value) => single_result(value),
        Err(_) => single_result(text),
    })
}

fn transport_error(tool: &str, err: reqwest::Error) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(tool.to_string())
    } else {
        unavailable(tool, err)
    }
}

fn unavailable(tool: &str, err: impl std::fmt::Display) -> ToolError {
    ToolError::Unavailable {
        tool: tool.to_string(),
        reason: err.to_string(),
    }
}
