//! 管理器构建器：统一的组件初始化逻辑
//!
//! 账本、分级器、重试策略由同一处按配置装配，HTTP 服务与测试共用。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::classifier::{ErrorClassifier, DEFAULT_MAX_HISTORY};
use crate::core::manager::AgentManager;
use crate::core::recovery::RetryPolicy;
use crate::llm::AgentCapability;
use crate::memory::{MemoryLedger, DEFAULT_MAX_ENTRIES};

pub struct ManagerBuilder {
    max_entries: usize,
    max_history: usize,
    policy: RetryPolicy,
    agents: Vec<(String, Arc<dyn AgentCapability>)>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_history: DEFAULT_MAX_HISTORY,
            policy: RetryPolicy::default(),
            agents: Vec::new(),
        }
    }

    /// 从配置文件各段读取容量与重试参数
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_entries: config.memory.max_entries,
            max_history: config.errors.max_history,
            policy: config.retry_policy(),
            agents: Vec::new(),
        }
    }

    /// 账本容量
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// 错误与反馈历史容量
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy = self.policy.with_attempt_timeout(timeout);
        self
    }

    /// 预注册 Agent，build 后即可按名调用
    pub fn with_agent(mut self, name: impl Into<String>, agent: Arc<dyn AgentCapability>) -> Self {
        self.agents.push((name.into(), agent));
        self
    }

    pub async fn build(self) -> AgentManager {
        let ledger = Arc::new(MemoryLedger::new(self.max_entries));
        let classifier =
            Arc::new(ErrorClassifier::new(self.max_history).with_ledger(Arc::clone(&ledger)));
        let manager = AgentManager::new(ledger, classifier, self.policy);
        for (name, agent) in self.agents {
            manager.register_agent(name, agent).await;
        }
        manager
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
