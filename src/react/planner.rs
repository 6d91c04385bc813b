//! 推理器：下一步动作的产生与解析
//!
//! `Reasoner` 是「给定上下文，产生下一步动作或最终答案」这一能力的抽象；
//! `LlmReasoner` 调用 LLM，parse_action 从文本中提取 JSON 并解析为工具调用或最终答案。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::react::{ReactTrace, TraceStep};
use crate::tools::ToolArgs;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "add", "args": {"augend": 3, "summand": 4}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: ToolArgs,
}

/// 推理输出
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    InvokeTool(ToolCall),
    FinalAnswer(String),
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    answer: Option<String>,
}

/// 提取以 `open`（`{` 或 `[`）开头的 JSON 片段：优先 ```json 代码块，否则取首个 `open` 到末个对应闭合符
///
/// 由调用方指定期望的开括号，正文中的 `[1]` 之类引用不会截走对象。
pub fn extract_json(output: &str, open: char) -> Option<&str> {
    let close = match open {
        '{' => '}',
        '[' => ']',
        _ => return None,
    };
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let block = rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
        if block.starts_with(open) {
            return Some(block);
        }
    }
    let start = trimmed.find(open)?;
    trimmed.rfind(close).filter(|end| *end > start).map(|end| &trimmed[start..=end])
}

/// 解析 LLM 输出：含 tool 的 JSON 为工具调用，含 answer 的 JSON 或纯文本为最终答案
pub fn parse_action(output: &str) -> Result<Action, AgentError> {
    let trimmed = output.trim();
    let json_str = match extract_json(trimmed, '{') {
        Some(s) => s,
        None => return Ok(Action::FinalAnswer(trimmed.to_string())),
    };

    let parsed: RawAction = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if let Some(answer) = parsed.answer.filter(|a| !a.trim().is_empty()) {
        return Ok(Action::FinalAnswer(answer.trim().to_string()));
    }
    if parsed.tool.trim().is_empty() {
        return Err(AgentError::JsonParseError(format!(
            "JSON has neither a tool nor an answer: {json_str}"
        )));
    }
    let args = match parsed.args {
        None | Some(serde_json::Value::Null) => ToolArgs::new(),
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            return Err(AgentError::JsonParseError(format!(
                "args must be an object, got {other}"
            )))
        }
    };
    Ok(Action::InvokeTool(ToolCall {
        tool: parsed.tool.trim().to_string(),
        args,
    }))
}

/// 给定追加式上下文，产生下一步动作
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn next_action(&self, trace: &ReactTrace) -> Result<Action, AgentError>;
}

const DEFAULT_REACT_PROMPT: &str = "You answer one sub-question of a larger question by reasoning step by step \
and calling tools. Each reply must be exactly one of:\n\
- a tool call: {\"tool\": \"<tool name>\", \"args\": {...}}\n\
- a final answer: {\"answer\": \"<concise answer>\"}\n\
Use tool results rather than guessing. Never call a tool that is not listed.\n\nAvailable tools:\n";

/// 基于 LLM 的 ReAct 推理器
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmReasoner {
    /// `tools_schema` 为 ToolRegistry::to_schema_json 的输出
    pub fn new(llm: Arc<dyn LlmClient>, tools_schema: &str) -> Self {
        Self {
            llm,
            system_prompt: format!("{DEFAULT_REACT_PROMPT}{tools_schema}"),
        }
    }

    /// 上下文 -> 消息序列：system、任务描述（含原问题与前序答案），随后每步动作 / 观察交替
    fn build_messages(&self, trace: &ReactTrace) -> Vec<Message> {
        let mut task = String::new();
        if let Some(original) = trace.original_question() {
            task.push_str(&format!("Original question: {original}\n"));
        }
        for prior in trace.prior_answers() {
            task.push_str(&format!(
                "Related question: {}\n> Answer: {}\n",
                prior.question, prior.answer
            ));
        }
        task.push_str(&format!("Sub-question: {}", trace.question()));

        let mut messages = vec![Message::system(self.system_prompt.clone()), Message::user(task)];
        for step in trace.steps() {
            match step {
                TraceStep::Action(call) => messages.push(Message::assistant(
                    serde_json::json!({ "tool": call.tool, "args": call.args }).to_string(),
                )),
                TraceStep::Observation { tool, content, ok } => {
                    let label = if *ok { "Observation" } else { "Tool error" };
                    messages.push(Message::user(format!("{label} from {tool}: {content}")));
                }
                TraceStep::Correction(prompt) => messages.push(Message::user(prompt.clone())),
            }
        }
        messages
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn next_action(&self, trace: &ReactTrace) -> Result<Action, AgentError> {
        let output = self
            .llm
            .complete(&self.build_messages(trace))
            .await
            .map_err(AgentError::LlmError)?;
        parse_action(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::react::PriorAnswer;

    #[test]
    fn test_parse_tool_call() {
        let out = r#"I'll count. {"tool": "count_substrings", "args": {"string": "strawberry", "substring": "r"}}"#;
        match parse_action(out).unwrap() {
            Action::InvokeTool(call) => {
                assert_eq!(call.tool, "count_substrings");
                assert_eq!(call.args["substring"], "r");
            }
            other => panic!("Expected InvokeTool, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_fenced_answer() {
        let out = "```json\n{\"answer\": \"3\"}\n```";
        assert_eq!(parse_action(out).unwrap(), Action::FinalAnswer("3".into()));
    }

    #[test]
    fn test_parse_plain_text_is_final_answer() {
        assert_eq!(
            parse_action("  The letter r appears 3 times. ").unwrap(),
            Action::FinalAnswer("The letter r appears 3 times.".into())
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_action(r#"{"tool": "add", "args": {"augend": 3}"#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_action(r#"{"tool": "add", "args": [1, 2]}"#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_action(r#"{"thought": "hmm"}"#),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[test]
    fn test_extract_json_by_delimiter() {
        assert_eq!(extract_json("steps: [\"a\", \"b\"] ok", '['), Some("[\"a\", \"b\"]"));
        assert_eq!(extract_json("steps: [\"a\", \"b\"] ok", '{'), None);
        assert_eq!(extract_json("no json here", '{'), None);
        assert_eq!(
            extract_json("see [1] then ```json\n{\"answer\": \"x\"}\n```", '{'),
            Some("{\"answer\": \"x\"}")
        );
    }

    #[test]
    fn test_prose_brackets_before_tool_call() {
        let action =
            parse_action(r#"I need to add [3 and 4]. {"tool": "add", "args": {"augend": 3, "summand": 4}}"#).unwrap();
        match action {
            Action::InvokeTool(call) => {
                assert_eq!(call.tool, "add");
                assert_eq!(call.args.get("summand"), Some(&serde_json::json!(4)));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(
            parse_action(r#"Per [1], {"answer": "21"}"#).unwrap(),
            Action::FinalAnswer("21".into())
        );
    }

    #[tokio::test]
    async fn test_llm_reasoner_renders_context() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"answer": "21"}"#]));
        let reasoner = LlmReasoner::new(llm.clone(), "[]");

        let mut trace = ReactTrace::new(1, "multiply 3 by 7")
            .with_original_question("What is 3 times (3+4)?")
            .with_prior_answers(vec![PriorAnswer {
                question: "compute 3+4".into(),
                answer: "7".into(),
            }]);
        trace.push(TraceStep::Observation {
            tool: "multiply".into(),
            content: "{\"result\":21}".into(),
            ok: true,
        });

        let action = reasoner.next_action(&trace).await.unwrap();
        assert_eq!(action, Action::FinalAnswer("21".into()));

        let sent = &llm.calls()[0];
        assert!(sent[1].content.contains("Original question: What is 3 times (3+4)?"));
        assert!(sent[1].content.contains("> Answer: 7"));
        assert!(sent[2].content.starts_with("Observation from multiply"));
    }
}
