//! 组装：从 AppConfig 构建 LLM、工具、编排器与 actor 运行时
//!
//! 服务端入口与集成测试共用；测试可直接调用 build_orchestrator 注入脚本化 LLM。

use std::sync::Arc;
use std::time::Duration;

use crate::actor::{ActorRuntime, MemoryStateStore};
use crate::config::{AppConfig, LlmSection, ToolsSection, WorkflowSection};
use crate::core::AgentError;
use crate::llm::{LlmClient, OpenAiClient};
use crate::react::{LlmReasoner, ReactExecutor};
use crate::tools::{builtin_registry, remote, ToolExecutor};
use crate::workflow::{
    Consolidator, DecompositionLoop, LlmDecomposer, LlmRefiner, LlmSynthesizer, Orchestrator, SelfDiscoverPlanner,
};

/// 根据 [llm] 段创建推理后端（OpenAI 兼容）
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.to_lowercase().as_str() {
        "openai" => {
            let api_key = std::env::var(&cfg.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(env = %cfg.api_key_env, "API key not set, requests will likely be rejected");
            }
            tracing::info!(model = %cfg.model, "using OpenAI-compatible LLM");
            Ok(Arc::new(OpenAiClient::new(
                Some(cfg.base_url.as_str()),
                &cfg.model,
                api_key,
                cfg.request_timeout_secs,
            )))
        }
        other => Err(AgentError::ConfigError(format!("unknown llm provider: {other}"))),
    }
}

/// 内置工具 + 远程注册表中的工具；注册表不可达时记录警告后跳过
pub async fn build_tool_executor(cfg: &ToolsSection) -> ToolExecutor {
    let mut registry = builtin_registry(&cfg.builtin);
    let url = cfg.registry_url.trim();
    if !url.is_empty() {
        match remote::discover(url, Duration::from_secs(cfg.tool_timeout_secs)).await {
            Ok(tools) => {
                tracing::info!(registry = %url, count = tools.len(), "remote tools registered");
                for tool in tools {
                    registry.register(tool);
                }
            }
            Err(e) => tracing::warn!(registry = %url, error = %e, "remote tool registry unavailable, skipped"),
        }
    }
    tracing::info!(tools = ?registry.tool_names(), "tool registry ready");
    ToolExecutor::new(registry, cfg.tool_timeout_secs)
}

/// 用同一个 LLM 组装规划、分解 / 精炼、ReAct 与合成
pub fn build_orchestrator(llm: Arc<dyn LlmClient>, tools: Arc<ToolExecutor>, cfg: &WorkflowSection) -> Orchestrator {
    let planner = SelfDiscoverPlanner::new(llm.clone()).with_modules(cfg.reasoning_modules.clone());
    let decomposition = DecompositionLoop::new(
        Arc::new(LlmDecomposer::new(llm.clone())),
        Arc::new(LlmRefiner::new(llm.clone()).with_criteria(cfg.refinement_criteria())),
        cfg.max_refinement_iterations,
    );
    let reasoner = Arc::new(LlmReasoner::new(llm.clone(), &tools.schema_json()));
    let executor = ReactExecutor::new(reasoner, tools).with_step_budget(cfg.react_step_budget);
    Orchestrator::new(
        Arc::new(planner),
        decomposition,
        Arc::new(executor),
        Consolidator::new(Arc::new(LlmSynthesizer::new(llm))),
    )
}

/// 完整运行时：配置 -> LLM / 工具 -> 编排器 -> actor 运行时
pub async fn create_runtime(cfg: &AppConfig) -> Result<Arc<ActorRuntime>, AgentError> {
    let llm = create_llm_from_config(&cfg.llm)?;
    let tools = Arc::new(build_tool_executor(&cfg.tools).await);
    let orchestrator = Arc::new(build_orchestrator(llm, tools, &cfg.workflow));
    Ok(Arc::new(ActorRuntime::new(
        orchestrator,
        Arc::new(MemoryStateStore::new()),
        cfg.runtime_settings(),
    )))
}
