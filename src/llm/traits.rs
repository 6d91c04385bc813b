//! LLM 客户端抽象
//!
//! 推理结构生成、子问题分解与审查、ReAct 推理、答案合成都通过 LlmClient 调用模型后端。

use async_trait::async_trait;

use crate::llm::Message;

/// 给定消息序列返回一次完整回复；错误以可读字符串返回，由调用方映射为 AgentError
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
