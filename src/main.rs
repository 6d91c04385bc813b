//! DQA 服务入口
//!
//! 初始化日志、加载配置、构建 actor 运行时，并在 `server.bind_addr` 上提供 Agent 协议 HTTP 接口。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dqa::{
    agent::create_runtime,
    config::load_config,
    endpoint::{
        agent_card,
        http::{create_router, HttpState},
        AgentEndpoint,
    },
    observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选：第一个参数为额外的配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let runtime = create_runtime(&cfg).await.context("Failed to create runtime")?;
    let state = Arc::new(HttpState {
        endpoint: AgentEndpoint::new(runtime),
        card: agent_card(&format!("http://{}/", cfg.server.bind_addr)),
    });

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind_addr))?;
    tracing::info!(addr = %cfg.server.bind_addr, mode = ?cfg.workflow.execution_mode, "DQA agent listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
