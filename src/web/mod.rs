//! 只读监控接口（axum）
//!
//! - GET /monitoring/system/status
//! - GET /monitoring/agent/:name/context
//! - GET /monitoring/memory/export
//! - GET /health
//!
//! 全部返回 200 + JSON；无数据时返回空结构。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::core::{AgentContext, AgentManager, SystemStatus};
use crate::memory::MemoryExport;

pub fn create_router(manager: Arc<AgentManager>) -> Router {
    Router::new()
        .route("/monitoring/system/status", get(system_status))
        .route("/monitoring/agent/:name/context", get(agent_context))
        .route("/monitoring/memory/export", get(memory_export))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .with_state(manager)
}

async fn system_status(State(manager): State<Arc<AgentManager>>) -> Json<SystemStatus> {
    Json(manager.system_status().await)
}

async fn agent_context(
    State(manager): State<Arc<AgentManager>>,
    Path(name): Path<String>,
) -> Json<AgentContext> {
    Json(manager.agent_context(&name))
}

async fn memory_export(State(manager): State<Arc<AgentManager>>) -> Json<MemoryExport> {
    Json(manager.ledger().export())
}
