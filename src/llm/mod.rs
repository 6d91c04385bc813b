//! LLM 层：客户端抽象与实现（OpenAI 兼容 / 脚本化测试客户端）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::ScriptedLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;
