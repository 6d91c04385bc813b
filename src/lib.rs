//! DQA - 多跳问答工作流引擎
//!
//! 模块划分：
//! - **agent**: 组装（LLM、工具、编排器、actor 运行时）
//! - **actor**: 每个 run 一个 actor；方法投递与重试、pub/sub 与过期过滤、归档
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与恢复引擎
//! - **endpoint**: Agent 协议端点（submit / status / result / cancel）与 HTTP 绑定
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化）
//! - **observability**: 日志初始化
//! - **react**: 推理器、追加式上下文、ReAct 主循环
//! - **tools**: 工具注册表、带超时的执行器、内置与远程工具
//! - **workflow**: 数据模型、推理结构生成、分解 / 精炼、合成与编排

pub mod actor;
pub mod agent;
pub mod config;
pub mod core;
pub mod endpoint;
pub mod llm;
pub mod observability;
pub mod react;
pub mod tools;
pub mod workflow;
