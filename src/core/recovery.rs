//! 重试策略与恢复引擎
//!
//! 根据失败尝试的位置与错误类别返回 RecoveryAction，并给出该次尝试应记录的严重级别；
//! ResilientInvoker 只负责执行这些决策。

use std::time::Duration;

use crate::core::classifier::Severity;
use crate::core::{AgentError, RecoveryAction};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// 重试策略：最大尝试次数、退避基数、可选的单次尝试超时
///
/// 字段私有，只能经 `new` 构造，max_retries 始终 >= 1。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    /// None 表示不限制单次尝试时长
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// 第 attempt 次（从 1 开始）失败后的等待：base_delay * 2^(attempt-1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }

    /// 升级规则：最后一次之前为 MEDIUM，最后一次为 HIGH
    pub fn severity_for(&self, attempt: u32) -> Severity {
        if attempt < self.max_retries {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

/// 将失败尝试映射为动作（重试 / 放弃 / 立即失败）
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        if !err.is_retryable() {
            return RecoveryAction::FailFast;
        }
        if attempt < self.policy.max_retries {
            RecoveryAction::Retry {
                delay: self.policy.delay_for(attempt),
            }
        } else {
            RecoveryAction::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for(60), Duration::MAX);
    }

    #[test]
    fn test_severity_escalation() {
        let policy = RetryPolicy::default();
        let severities: Vec<Severity> = (1..=3).map(|a| policy.severity_for(a)).collect();
        assert_eq!(severities, vec![Severity::Medium, Severity::Medium, Severity::High]);
    }

    #[test]
    fn test_single_attempt_policy_is_high() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.severity_for(1), Severity::High);
        let engine = RecoveryEngine::new(policy);
        assert_eq!(
            engine.handle(&AgentError::Transient("reset".into()), 1),
            RecoveryAction::GiveUp
        );
    }

    #[test]
    fn test_recovery_transient_retries_then_gives_up() {
        let engine = RecoveryEngine::new(RetryPolicy::new(3, Duration::from_millis(10)));
        let err = AgentError::Transient("reset".into());
        assert_eq!(
            engine.handle(&err, 1),
            RecoveryAction::Retry {
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(
            engine.handle(&err, 2),
            RecoveryAction::Retry {
                delay: Duration::from_millis(20)
            }
        );
        assert_eq!(engine.handle(&err, 3), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_recovery_malformed_is_retried() {
        let engine = RecoveryEngine::default();
        let err = AgentError::MalformedResponse("{".into());
        assert!(matches!(engine.handle(&err, 1), RecoveryAction::Retry { .. }));
    }

    #[test]
    fn test_recovery_config_fails_fast() {
        let engine = RecoveryEngine::default();
        let err = AgentError::Configuration("missing api key".into());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::FailFast);
    }
}
