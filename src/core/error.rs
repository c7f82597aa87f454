//! Agent 调用错误与恢复动作
//!
//! 与 RecoveryEngine 配合：瞬时失败与响应格式错误可重试，配置错误立即失败，重试耗尽后包装为 Exhausted。

use std::time::Duration;

use thiserror::Error;

/// Agent 能力调用过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 网络、服务端 5xx 等瞬时失败
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// 能力返回了无法提取或校验的内容
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// 缺失或无效的能力标识、凭证
    #[error("Config error: {0}")]
    Configuration(String),

    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    /// 告警回调自身失败（始终被隔离，不会传给调用方）
    #[error("Callback failed: {0}")]
    Callback(String),

    /// 所有重试均失败；携带最后一次尝试的错误
    #[error("All {attempts} attempts failed for agent '{agent_name}': {last}")]
    Exhausted {
        agent_name: String,
        attempts: u32,
        #[source]
        last: Box<AgentError>,
    },
}

impl AgentError {
    /// 稳定的错误类别名，用于 ErrorRecord.error_kind 与统计
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Transient(_) => "Transient",
            AgentError::RateLimited { .. } => "RateLimited",
            AgentError::Timeout(_) => "Timeout",
            AgentError::MalformedResponse(_) => "MalformedResponse",
            AgentError::Configuration(_) => "Configuration",
            AgentError::AgentNotFound(_) => "AgentNotFound",
            AgentError::Callback(_) => "Callback",
            AgentError::Exhausted { .. } => "Exhausted",
        }
    }

    /// 是否走重试路径
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transient(_)
                | AgentError::RateLimited { .. }
                | AgentError::Timeout(_)
                | AgentError::MalformedResponse(_)
        )
    }

    /// 配置类错误：不消耗重试次数，直接以 CRITICAL 失败
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::Configuration(_) | AgentError::AgentNotFound(_)
        )
    }

    /// 对 Exhausted 取最后一次尝试的错误，其余返回自身
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// 恢复引擎针对一次失败尝试给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后进行下一次尝试
    Retry { delay: Duration },
    /// 已是最后一次尝试，转入耗尽处理
    GiveUp,
    /// 不可重试的错误：立即失败
    FailFast,
}
