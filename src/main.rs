//! agent-keeper 监控服务
//!
//! 入口：加载配置、初始化日志、构建 AgentManager，启动只读监控接口直到收到关闭信号。
//!
//! 启动: cargo run -- [config.toml]
//! 浏览器访问 http://127.0.0.1:8080/monitoring/system/status

use std::path::PathBuf;
use std::sync::Arc;

use agent_keeper::{
    config::load_config,
    core::{ManagerBuilder, ShutdownManager},
    llm::MockAgent,
    observability,
    web::create_router,
};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    // 本地演示用的回显 Agent；嵌入方通过 AgentManager::register_agent 注册真实 Agent
    let manager = ManagerBuilder::from_config(&cfg)
        .with_agent("echo", Arc::new(MockAgent::echo()))
        .build()
        .await;
    let app = create_router(Arc::new(manager));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!("agent-keeper listening on http://{}", cfg.server.bind);

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Server run failed")?;

    tracing::info!("Server stopped");
    Ok(())
}
