//! Mock Agent（用于测试与本地演示，无需 API）
//!
//! 按预设脚本依次返回结果；脚本耗尽后回显本轮输入。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{AgentCapability, AgentRequest, AgentResponse};
use crate::memory::lock_or_recover;

/// 脚本化 Mock：每次 invoke 取出一条预设结果
#[derive(Debug, Default)]
pub struct MockAgent {
    script: Mutex<VecDeque<Result<AgentResponse, AgentError>>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MockAgent {
    /// 无脚本：总是回显
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = Result<AgentResponse, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 前 failures 次返回 err，之后回显
    pub fn failing(failures: usize, err: AgentError) -> Self {
        Self::scripted((0..failures).map(|_| Err(err.clone())))
    }

    /// 每次调用前等待（配合 tokio 暂停时钟测试超时）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentCapability for MockAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = lock_or_recover(&self.script).pop_front();
        next.unwrap_or_else(|| {
            Ok(AgentResponse::Text(format!("Echo from Mock: {}", request.input)))
        })
    }
}
