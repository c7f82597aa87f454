//! 只读状态查询：单个 Agent 的上下文与全局系统状态
//!
//! 纯聚合，不修改账本与分级器；未知 Agent 返回空集合而不是错误。

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::classifier::{ErrorClassifier, ErrorRecord, ErrorSummary, FeedbackSummary};
use crate::memory::{MemoryEntry, MemoryLedger, MemorySummary, Message};

pub const CONTEXT_HISTORY_LIMIT: usize = 20;
pub const CONTEXT_RECENT_MEMORIES: usize = 10;
pub const CONTEXT_RECENT_ERRORS: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_name: String,
    pub conversation_history: Vec<Message>,
    /// 最近记录，最新在前
    pub memories: Vec<MemoryEntry>,
    /// 最近错误，最新在前
    pub errors: Vec<ErrorRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub agents: Vec<String>,
    pub memory: MemorySummary,
    pub errors: ErrorSummary,
    pub feedback: FeedbackSummary,
}

#[derive(Clone)]
pub struct StatusQuery {
    ledger: Arc<MemoryLedger>,
    classifier: Arc<ErrorClassifier>,
}

impl StatusQuery {
    pub fn new(ledger: Arc<MemoryLedger>, classifier: Arc<ErrorClassifier>) -> Self {
        Self { ledger, classifier }
    }

    pub fn agent_context(&self, agent_name: &str) -> AgentContext {
        AgentContext {
            agent_name: agent_name.to_string(),
            conversation_history: self
                .ledger
                .get_conversation_history(CONTEXT_HISTORY_LIMIT, Some(agent_name)),
            memories: self
                .ledger
                .get_recent(CONTEXT_RECENT_MEMORIES, Some(agent_name)),
            errors: self
                .classifier
                .recent_errors(CONTEXT_RECENT_ERRORS, Some(agent_name)),
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        self.system_status_with(std::iter::empty::<String>())
    }

    /// agents 为账本、错误、反馈中出现过的 Agent 与 extra_agents（如已注册的 Agent）的并集
    pub fn system_status_with(
        &self,
        extra_agents: impl IntoIterator<Item = String>,
    ) -> SystemStatus {
        let memory = self.ledger.summary();
        let errors = self.classifier.error_summary();
        let feedback = self.classifier.feedback_summary();

        let agents: BTreeSet<String> = memory
            .by_agent
            .keys()
            .chain(errors.by_agent.keys())
            .chain(feedback.by_agent.keys())
            .cloned()
            .chain(extra_agents)
            .collect();

        SystemStatus {
            agents: agents.into_iter().collect(),
            memory,
            errors,
            feedback,
        }
    }
}
