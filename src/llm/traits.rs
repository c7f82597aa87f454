//! Agent 能力抽象
//!
//! 任何可调用的 Agent 后端实现 AgentCapability：一次 invoke 返回响应或错误。
//! 同步后端用 BlockingAgent 包装，在 blocking 线程池中执行，不阻塞运行时。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Message;

/// 一次调用的请求：本轮输入 + 可选的历史对话
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub input: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
}

impl AgentRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// 历史 + 本轮输入，按 LLM API 的消息顺序
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.input.clone()));
        messages
    }
}

/// 能力返回值：纯文本或结构化 JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentResponse {
    Text(String),
    Structured(serde_json::Value),
}

impl From<String> for AgentResponse {
    fn from(s: String) -> Self {
        AgentResponse::Text(s)
    }
}

impl From<&str> for AgentResponse {
    fn from(s: &str) -> Self {
        AgentResponse::Text(s.to_string())
    }
}

impl From<serde_json::Value> for AgentResponse {
    fn from(v: serde_json::Value) -> Self {
        AgentResponse::Structured(v)
    }
}

/// Agent 能力 trait：失败以 Err 返回，由 ResilientInvoker 决定是否重试
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;

    /// 底层是否为同步实现（仅用于日志与诊断）
    fn is_blocking(&self) -> bool {
        false
    }
}

/// 同步后端适配器：每次调用放到 spawn_blocking 中执行
pub struct BlockingAgent<F> {
    call: Arc<F>,
}

impl<F> BlockingAgent<F>
where
    F: Fn(&AgentRequest) -> Result<AgentResponse, AgentError> + Send + Sync + 'static,
{
    pub fn new(call: F) -> Self {
        Self {
            call: Arc::new(call),
        }
    }
}

#[async_trait]
impl<F> AgentCapability for BlockingAgent<F>
where
    F: Fn(&AgentRequest) -> Result<AgentResponse, AgentError> + Send + Sync + 'static,
{
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let call = Arc::clone(&self.call);
        let request = request.clone();
        tokio::task::spawn_blocking(move || call(&request))
            .await
            .map_err(|e| AgentError::Transient(format!("blocking agent task failed: {e}")))?
    }

    fn is_blocking(&self) -> bool {
        true
    }
}
