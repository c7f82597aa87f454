//! Agent 管理器：进程内唯一的上下文对象
//!
//! 持有账本、分级器、调用器与已注册 Agent；启动时创建一次，以 Arc 传入每个请求处理路径。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::RwLock;

use crate::core::classifier::ErrorClassifier;
use crate::core::invoker::{InvokeOptions, ResilientInvoker};
use crate::core::recovery::RetryPolicy;
use crate::core::status::{AgentContext, StatusQuery, SystemStatus};
use crate::core::AgentError;
use crate::llm::{extract_text, AgentCapability, AgentResponse};
use crate::memory::{into_metadata, MemoryLedger, MemoryType};

/// chat_multiple 的单个请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub agent_name: String,
    pub message: String,
    pub options: InvokeOptions,
}

impl ChatRequest {
    pub fn new(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            message: message.into(),
            options: InvokeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct AgentManager {
    ledger: Arc<MemoryLedger>,
    classifier: Arc<ErrorClassifier>,
    invoker: ResilientInvoker,
    status: StatusQuery,
    agents: RwLock<HashMap<String, Arc<dyn AgentCapability>>>,
}

impl AgentManager {
    pub fn new(
        ledger: Arc<MemoryLedger>,
        classifier: Arc<ErrorClassifier>,
        policy: RetryPolicy,
    ) -> Self {
        let invoker = ResilientInvoker::new(Arc::clone(&ledger), Arc::clone(&classifier), policy);
        let status = StatusQuery::new(Arc::clone(&ledger), Arc::clone(&classifier));
        tracing::info!(
            max_entries = ledger.max_entries(),
            max_retries = invoker.policy().max_retries(),
            "AgentManager initialized"
        );
        Self {
            ledger,
            classifier,
            invoker,
            status,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn invoker(&self) -> &ResilientInvoker {
        &self.invoker
    }

    pub fn status(&self) -> &StatusQuery {
        &self.status
    }

    /// 注册（或替换）同名 Agent；替换时返回 true
    pub async fn register_agent(
        &self,
        name: impl Into<String>,
        capability: Arc<dyn AgentCapability>,
    ) -> bool {
        let name = name.into();
        let replaced = self
            .agents
            .write()
            .await
            .insert(name.clone(), capability)
            .is_some();
        self.ledger.add(
            MemoryType::SystemEvent,
            format!("Agent '{name}' registered"),
            Some(&name),
            into_metadata(json!({ "event": "agent_registered", "replaced": replaced })),
        );
        tracing::info!(agent = %name, replaced, "Agent registered");
        replaced
    }

    pub async fn get_agent(&self, name: &str) -> Option<Arc<dyn AgentCapability>> {
        let agent = self.agents.read().await.get(name).cloned();
        if agent.is_none() {
            tracing::warn!(agent = name, "Agent not found");
        }
        agent
    }

    pub async fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn remove_agent(&self, name: &str) -> bool {
        let removed = self.agents.write().await.remove(name).is_some();
        if removed {
            tracing::info!(agent = name, "Agent removed");
        } else {
            tracing::warn!(agent = name, "Cannot remove agent - not found");
        }
        removed
    }

    /// 按名称调用 Agent；未注册的名称视为配置错误，直接以 CRITICAL 失败
    pub async fn chat_with_retry(
        &self,
        agent_name: &str,
        message: &str,
        options: &InvokeOptions,
    ) -> Result<AgentResponse, AgentError> {
        // 读锁只用于取出 Arc，调用与退避期间不持锁
        let Some(agent) = self.get_agent(agent_name).await else {
            return Err(self.invoker.reject(
                agent_name,
                message,
                AgentError::AgentNotFound(agent_name.to_string()),
                options,
            ));
        };
        self.invoker
            .invoke(agent_name, agent.as_ref(), message, options)
            .await
    }

    /// 同 chat_with_retry，返回提取后的文本
    pub async fn chat_text(
        &self,
        agent_name: &str,
        message: &str,
        options: &InvokeOptions,
    ) -> Result<String, AgentError> {
        self.chat_with_retry(agent_name, message, options)
            .await
            .map(|r| extract_text(&r))
    }

    /// 并发执行多个逻辑调用，结果与请求顺序一致
    pub async fn chat_multiple(
        &self,
        requests: Vec<ChatRequest>,
    ) -> Vec<Result<AgentResponse, AgentError>> {
        let total = requests.len();
        tracing::info!("Parallel chat: sending {} requests concurrently", total);
        let results = join_all(requests.iter().map(|req| {
            self.chat_with_retry(&req.agent_name, &req.message, &req.options)
        }))
        .await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!("Parallel chat completed: {}/{} successful", ok, total);
        results
    }

    pub fn agent_context(&self, agent_name: &str) -> AgentContext {
        self.status.agent_context(agent_name)
    }

    /// 系统状态：agents 同时包含已注册但尚无记录的 Agent
    pub async fn system_status(&self) -> SystemStatus {
        let registered = self.list_agents().await;
        self.status.system_status_with(registered)
    }
}
