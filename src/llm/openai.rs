//! OpenAI 兼容的 chat-completion 后端
//!
//! base_url 为空时使用官方端点；每次请求受 request_timeout 约束，超时与后端错误都以字符串返回给调用方。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<String>, request_timeout_secs: u64) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key.unwrap_or_default());
        if let Some(url) = base_url.map(str::trim).filter(|u| !u.is_empty()) {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn request_message(message: &Message) -> Result<ChatCompletionRequestMessage, String> {
    let content = message.content.clone();
    let built = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::Assistant),
    };
    built.map_err(|e| format!("invalid {:?} message: {e}", message.role))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let messages = messages.iter().map(request_message).collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| format!("completion timed out after {}s", self.request_timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        tracing::debug!(
            model = %self.model,
            prompt_tokens = response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens),
            chars = reply.len(),
            "llm completion"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_message_keeps_role() {
        let system = request_message(&Message::system("be brief")).unwrap();
        assert!(matches!(system, ChatCompletionRequestMessage::System(_)));
        let user = request_message(&Message::user("2+2?")).unwrap();
        assert!(matches!(user, ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_blank_base_url_uses_default_endpoint() {
        let client = OpenAiClient::new(Some("  "), "gpt-4o-mini", None, 5);
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.request_timeout, Duration::from_secs(5));
    }
}
