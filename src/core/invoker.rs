//! 带记录与重试的 Agent 调用
//!
//! 一次逻辑调用：记录输入 → 尝试 1..=max_retries → 成功则记录响应与 success 反馈并返回；
//! 失败按 RecoveryEngine 的决定退避重试（MEDIUM，最后一次 HIGH），耗尽后恰好触发一次 CRITICAL。
//! 配置类错误不消耗重试次数，直接以 CRITICAL 失败。
//!
//! 退避等待是循环内唯一的挂起点，等待期间不持有账本或分级器的锁。

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::classifier::{ErrorClassifier, FeedbackKind, Severity};
use crate::core::recovery::{RecoveryEngine, RetryPolicy};
use crate::core::{AgentError, RecoveryAction};
use crate::llm::{extract_text, AgentCapability, AgentRequest, AgentResponse};
use crate::memory::{into_metadata, MemoryLedger, MemoryType};

/// 带历史调用时默认附带的对话条数
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// 单次逻辑调用的选项
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// 是否写入账本（错误分级始终记录）
    pub track: bool,
    /// 是否把该 Agent 的对话历史附在请求中
    pub use_history: bool,
    /// 响应文本必须是合法 JSON，否则按格式错误重试
    pub expect_json: bool,
    pub history_limit: usize,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            track: true,
            use_history: false,
            expect_json: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl InvokeOptions {
    pub fn untracked() -> Self {
        Self {
            track: false,
            ..Self::default()
        }
    }

    pub fn with_history(mut self) -> Self {
        self.use_history = true;
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// 组合账本、分级器与重试策略；跨所有逻辑调用复用
pub struct ResilientInvoker {
    ledger: Arc<MemoryLedger>,
    classifier: Arc<ErrorClassifier>,
    recovery: RecoveryEngine,
}

impl ResilientInvoker {
    pub fn new(
        ledger: Arc<MemoryLedger>,
        classifier: Arc<ErrorClassifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            classifier,
            recovery: RecoveryEngine::new(policy),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.recovery.policy()
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// 执行一次逻辑调用；只有耗尽或不可重试的错误才返回 Err
    pub async fn invoke(
        &self,
        agent_name: &str,
        capability: &dyn AgentCapability,
        input: &str,
        options: &InvokeOptions,
    ) -> Result<AgentResponse, AgentError> {
        let call_id = Uuid::new_v4().to_string();

        let mut request = AgentRequest::new(input);
        if options.use_history {
            request.history = self
                .ledger
                .get_conversation_history(options.history_limit, Some(agent_name));
        }
        self.record_input(agent_name, &call_id, input, request.history.len(), options);
        tracing::info!(
            agent = agent_name,
            call_id = %call_id,
            blocking = capability.is_blocking(),
            "Sending message, length: {} chars",
            input.len()
        );

        // RetryPolicy 保证 max_retries >= 1，最后一次尝试必然得到 GiveUp，循环总会返回
        let mut attempt = 1;
        loop {
            let err = match self.attempt(capability, &request, options).await {
                Ok((response, text)) => {
                    self.record_success(agent_name, &call_id, attempt, text, options);
                    return Ok(response);
                }
                Err(err) => err,
            };

            match self.recovery.handle(&err, attempt) {
                RecoveryAction::FailFast => {
                    return Err(self.fail_fast(agent_name, err, &call_id, options.track));
                }
                RecoveryAction::Retry { delay } => {
                    self.record_failed_attempt(agent_name, &call_id, &err, attempt, options.track);
                    tracing::warn!(
                        agent = agent_name,
                        call_id = %call_id,
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        self.policy().max_retries(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RecoveryAction::GiveUp => {
                    self.record_failed_attempt(agent_name, &call_id, &err, attempt, options.track);
                    return Err(self.exhaust(agent_name, &call_id, err, attempt, options.track));
                }
            }
        }
    }

    /// 调用开始前就已确定失败（如找不到 Agent）：照常记录输入，再以 CRITICAL 失败
    ///
    /// 账本中与能力返回配置错误时的形态一致：UserInput 后跟一条 Error。
    pub fn reject(
        &self,
        agent_name: &str,
        input: &str,
        err: AgentError,
        options: &InvokeOptions,
    ) -> AgentError {
        let call_id = Uuid::new_v4().to_string();
        self.record_input(agent_name, &call_id, input, 0, options);
        self.fail_fast(agent_name, err, &call_id, options.track)
    }

    fn record_input(
        &self,
        agent_name: &str,
        call_id: &str,
        input: &str,
        history_messages: usize,
        options: &InvokeOptions,
    ) {
        if !options.track {
            return;
        }
        self.ledger.add(
            MemoryType::UserInput,
            input,
            Some(agent_name),
            into_metadata(json!({
                "call_id": call_id,
                "use_history": options.use_history,
                "history_messages": history_messages,
            })),
        );
    }

    fn record_failed_attempt(
        &self,
        agent_name: &str,
        call_id: &str,
        err: &AgentError,
        attempt: u32,
        track: bool,
    ) {
        let max_retries = self.policy().max_retries();
        let severity = self.policy().severity_for(attempt);
        let message =
            format!("Attempt {attempt}/{max_retries} failed for agent '{agent_name}': {err}");
        self.classifier.handle_error(
            err,
            &message,
            severity,
            Some(agent_name),
            into_metadata(json!({
                "operation": "invoke",
                "call_id": call_id,
                "attempt": attempt,
                "max_retries": max_retries,
            })),
        );
        if track {
            self.ledger.add(
                MemoryType::Error,
                format!("Attempt {attempt}/{max_retries} failed: {}: {err}", err.kind()),
                Some(agent_name),
                into_metadata(json!({
                    "call_id": call_id,
                    "attempt": attempt,
                    "max_retries": max_retries,
                    "error_kind": err.kind(),
                    "severity": severity,
                })),
            );
        }
    }

    /// 不可重试的错误：记一次 CRITICAL（触发 CRITICAL 回调）后原样返回
    fn fail_fast(
        &self,
        agent_name: &str,
        err: AgentError,
        call_id: &str,
        track: bool,
    ) -> AgentError {
        let message = if err.is_configuration() {
            format!("Agent '{agent_name}' is misconfigured: {err}")
        } else {
            format!("Agent '{agent_name}' failed without retry: {err}")
        };
        self.classifier.handle_error(
            &err,
            &message,
            Severity::Critical,
            Some(agent_name),
            into_metadata(json!({
                "operation": "invoke",
                "call_id": call_id,
                "retryable": false,
                "configuration": err.is_configuration(),
            })),
        );
        if track {
            self.ledger.add(
                MemoryType::Error,
                format!("{}: {err}", err.kind()),
                Some(agent_name),
                into_metadata(json!({
                    "call_id": call_id,
                    "error_kind": err.kind(),
                    "severity": Severity::Critical,
                    "retryable": false,
                })),
            );
        }
        err
    }

    async fn attempt(
        &self,
        capability: &dyn AgentCapability,
        request: &AgentRequest,
        options: &InvokeOptions,
    ) -> Result<(AgentResponse, String), AgentError> {
        // 超时会丢弃（即取消）尚在进行的调用
        let response = match self.policy().attempt_timeout() {
            Some(limit) => tokio::time::timeout(limit, capability.invoke(request))
                .await
                .map_err(|_| AgentError::Timeout(limit))??,
            None => capability.invoke(request).await?,
        };
        let text = extract_text(&response);
        if options.expect_json {
            serde_json::from_str::<Value>(&text)
                .map_err(|e| AgentError::MalformedResponse(format!("expected JSON: {e}")))?;
        }
        Ok((response, text))
    }

    fn record_success(
        &self,
        agent_name: &str,
        call_id: &str,
        attempt: u32,
        text: String,
        options: &InvokeOptions,
    ) {
        tracing::info!(
            agent = agent_name,
            call_id = %call_id,
            attempt,
            "Response received, length: {} chars",
            text.len()
        );
        if !options.track {
            return;
        }
        self.ledger.add(
            MemoryType::AgentResponse,
            text,
            Some(agent_name),
            into_metadata(json!({ "call_id": call_id, "attempt": attempt })),
        );
        self.classifier.add_feedback(
            FeedbackKind::Success,
            format!("Response received from '{agent_name}'"),
            Some(agent_name),
            into_metadata(json!({ "call_id": call_id, "attempts": attempt })),
        );
    }

    fn exhaust(
        &self,
        agent_name: &str,
        call_id: &str,
        last: AgentError,
        attempts: u32,
        track: bool,
    ) -> AgentError {
        let message = format!("All {attempts} attempts failed for agent '{agent_name}'");
        self.classifier.handle_error(
            &last,
            &message,
            Severity::Critical,
            Some(agent_name),
            into_metadata(json!({
                "operation": "invoke",
                "call_id": call_id,
                "exhausted": true,
                "attempts": attempts,
            })),
        );
        if track {
            self.ledger.add(
                MemoryType::SystemEvent,
                message,
                Some(agent_name),
                into_metadata(json!({
                    "call_id": call_id,
                    "exhausted": true,
                    "error_kind": last.kind(),
                })),
            );
        }
        AgentError::Exhausted {
            agent_name: agent_name.to_string(),
            attempts,
            last: Box::new(last),
        }
    }
}
