//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DQA__*` 覆盖（双下划线表示嵌套，如 `DQA__WORKFLOW__EXECUTION_MODE=parallel`）。
//! 所有字段都有默认值，空配置即可运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::actor::{RetryPolicy, RuntimeSettings, StalenessWindow};
use crate::workflow::{ExecutionMode, DEFAULT_REFINEMENT_CRITERIA};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub workflow: WorkflowSection,
    pub actor: ActorSection,
    pub server: ServerSection,
}

/// [llm] 段：推理后端位置与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 目前只支持 openai（任意 OpenAI 兼容端点）
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点；空表示官方地址
    pub base_url: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: String::new(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [tools] 段：工具超时、远程注册表、内置工具集
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 远程 MCP 服务端点；空表示只用内置工具
    pub registry_url: String,
    pub builtin: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            registry_url: String::new(),
            builtin: vec!["arithmetic".into(), "string".into(), "datetime".into()],
        }
    }
}

/// [workflow] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub max_refinement_iterations: usize,
    /// 每个子问题的推理轮数上限
    pub react_step_budget: usize,
    pub execution_mode: ExecutionMode,
    /// 空表示内置推理模块
    pub reasoning_modules: Vec<String>,
    /// 子问题审查标准；空表示 DEFAULT_REFINEMENT_CRITERIA
    pub refinement_criteria: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_refinement_iterations: 3,
            react_step_budget: crate::react::DEFAULT_STEP_BUDGET,
            execution_mode: ExecutionMode::Sequential,
            reasoning_modules: Vec::new(),
            refinement_criteria: String::new(),
        }
    }
}

impl WorkflowSection {
    /// 实际生效的审查标准
    pub fn refinement_criteria(&self) -> &str {
        match self.refinement_criteria.trim() {
            "" => DEFAULT_REFINEMENT_CRITERIA,
            criteria => criteria,
        }
    }
}

/// [actor] 段：重试、过期窗口、调用超时与 actor 生命周期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActorSection {
    pub retry_max_attempts: usize,
    pub retry_interval_ms: u64,
    pub staleness_window_secs: u64,
    pub invoke_timeout_secs: u64,
    pub mailbox_capacity: usize,
    /// 已归档 actor 的空闲停用时间
    pub idle_timeout_secs: u64,
}

impl Default for ActorSection {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_interval_ms: 100,
            staleness_window_secs: 60,
            invoke_timeout_secs: 10,
            mailbox_capacity: 64,
            idle_timeout_secs: 600,
        }
    }
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:32770".to_string(),
        }
    }
}

impl AppConfig {
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            retry: RetryPolicy::new(
                self.actor.retry_max_attempts,
                Duration::from_millis(self.actor.retry_interval_ms),
            ),
            staleness: StalenessWindow::new(Duration::from_secs(self.actor.staleness_window_secs)),
            invoke_timeout: Duration::from_secs(self.actor.invoke_timeout_secs),
            mailbox_capacity: self.actor.mailbox_capacity,
            idle_timeout: Duration::from_secs(self.actor.idle_timeout_secs),
            default_mode: self.workflow.execution_mode,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DQA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DQA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DQA")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.max_refinement_iterations, 3);
        assert_eq!(cfg.workflow.react_step_budget, 10);
        assert_eq!(cfg.actor.retry_max_attempts, 3);
        assert_eq!(cfg.actor.staleness_window_secs, 60);
        assert_eq!(cfg.server.bind_addr, "127.0.0.1:32770");

        assert_eq!(cfg.workflow.refinement_criteria(), DEFAULT_REFINEMENT_CRITERIA);

        let settings = cfg.runtime_settings();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.staleness.duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[workflow]\nexecution_mode = \"parallel\"\nreact_step_budget = 4\nrefinement_criteria = \"Each sub-question names one quantity.\"\n\n[actor]\nretry_max_attempts = 5"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.workflow.execution_mode, ExecutionMode::Parallel);
        assert_eq!(cfg.workflow.react_step_budget, 4);
        assert_eq!(cfg.workflow.max_refinement_iterations, 3);
        assert_eq!(cfg.workflow.refinement_criteria(), "Each sub-question names one quantity.");
        assert_eq!(cfg.actor.retry_max_attempts, 5);
        assert_eq!(cfg.tools.builtin.len(), 3);
    }
}
