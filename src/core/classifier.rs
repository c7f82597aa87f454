//! 错误分级与反馈记录
//!
//! - 错误历史：每条带严重级别、类别、上下文与错误链文本
//! - 回调：按严重级别注册，同步执行，逐个隔离（返回 Err 或 panic 均被吞掉并记录）
//! - 反馈历史：success / warning / error / info 标记
//!
//! 两段历史都用与账本相同的环形缓冲限界（默认各 1000 条）。

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{
    into_metadata, lock_or_recover, MemoryLedger, MemoryType, Metadata, RingBuffer,
};

pub const DEFAULT_MAX_HISTORY: usize = 1000;
/// 摘要中附带的最近记录条数
const RECENT_IN_SUMMARY: usize = 10;

/// 严重级别，LOW < MEDIUM < HIGH < CRITICAL
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Success,
    Warning,
    Error,
    Info,
}

impl FeedbackKind {
    pub const ALL: [FeedbackKind; 4] = [
        FeedbackKind::Success,
        FeedbackKind::Warning,
        FeedbackKind::Error,
        FeedbackKind::Info,
    ];
}

/// 一次错误的完整记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_kind: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub agent_name: Option<String>,
    /// 取自 context["operation"]
    pub operation: Option<String>,
    pub context: Metadata,
    pub stack_trace: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub kind: FeedbackKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub metadata: Metadata,
}

/// 注册回调时返回的句柄，用于注销
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(u64);

/// 告警回调：返回 Err 视为回调失败
pub type ErrorCallback = Arc<dyn Fn(&ErrorRecord) -> anyhow::Result<()> + Send + Sync>;

struct CallbackRegistration {
    severity: Severity,
    handler: ErrorCallback,
    token: CallbackToken,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorDigest {
    pub timestamp: DateTime<Utc>,
    pub error_kind: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub recent: Vec<ErrorDigest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackDigest {
    pub timestamp: DateTime<Utc>,
    pub kind: FeedbackKind,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total: usize,
    #[serde(rename = "by_type")]
    pub by_kind: BTreeMap<FeedbackKind, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub recent: Vec<FeedbackDigest>,
}

struct Histories {
    errors: RingBuffer<ErrorRecord>,
    feedback: RingBuffer<FeedbackRecord>,
}

struct Callbacks {
    registrations: Vec<CallbackRegistration>,
    next_token: u64,
}

/// 错误分级器（进程内单例，通过 Arc 共享）
pub struct ErrorClassifier {
    histories: Mutex<Histories>,
    callbacks: Mutex<Callbacks>,
    /// 挂载后，回调失败会写入一条 SystemEvent
    ledger: Option<Arc<MemoryLedger>>,
}

impl ErrorClassifier {
    pub fn new(max_history: usize) -> Self {
        Self {
            histories: Mutex::new(Histories {
                errors: RingBuffer::new(max_history),
                feedback: RingBuffer::new(max_history),
            }),
            callbacks: Mutex::new(Callbacks {
                registrations: Vec::new(),
                next_token: 1,
            }),
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<MemoryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// 记录错误并执行该级别的全部回调；不重试、不升级
    pub fn handle_error(
        &self,
        error: &AgentError,
        message: &str,
        severity: Severity,
        agent_name: Option<&str>,
        context: Metadata,
    ) -> ErrorRecord {
        let operation = context
            .get("operation")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let record = ErrorRecord {
            error_kind: error.kind().to_string(),
            message: if message.is_empty() {
                error.to_string()
            } else {
                message.to_string()
            },
            severity,
            timestamp: Utc::now(),
            agent_name: agent_name.map(str::to_string),
            operation,
            context,
            stack_trace: render_trace(error),
        };

        lock_or_recover(&self.histories).errors.push(record.clone());

        let agent = agent_name.unwrap_or("Unknown");
        if severity >= Severity::High {
            tracing::error!(agent, severity = %severity, kind = error.kind(), "{}", record.message);
        } else {
            tracing::warn!(agent, severity = %severity, kind = error.kind(), "{}", record.message);
        }

        self.run_callbacks(&record);
        record
    }

    pub fn add_feedback(
        &self,
        kind: FeedbackKind,
        message: impl Into<String>,
        agent_name: Option<&str>,
        metadata: Metadata,
    ) -> FeedbackRecord {
        let record = FeedbackRecord {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            agent_name: agent_name.map(str::to_string),
            metadata,
        };
        tracing::info!(
            kind = ?kind,
            agent = agent_name.unwrap_or("Unknown"),
            "feedback: {}",
            record.message
        );
        lock_or_recover(&self.histories).feedback.push(record.clone());
        record
    }

    pub fn register_callback<F>(&self, severity: Severity, handler: F) -> CallbackToken
    where
        F: Fn(&ErrorRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut callbacks = lock_or_recover(&self.callbacks);
        let token = CallbackToken(callbacks.next_token);
        callbacks.next_token += 1;
        callbacks.registrations.push(CallbackRegistration {
            severity,
            handler: Arc::new(handler),
            token,
        });
        token
    }

    /// 注销回调；token 未知时返回 false
    pub fn unregister_callback(&self, token: CallbackToken) -> bool {
        let mut callbacks = lock_or_recover(&self.callbacks);
        let before = callbacks.registrations.len();
        callbacks.registrations.retain(|r| r.token != token);
        callbacks.registrations.len() != before
    }

    pub fn callback_count(&self, severity: Severity) -> usize {
        lock_or_recover(&self.callbacks)
            .registrations
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    pub fn error_summary(&self) -> ErrorSummary {
        let histories = lock_or_recover(&self.histories);
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
        for e in histories.errors.iter() {
            *by_severity.entry(e.severity).or_default() += 1;
            *by_kind.entry(e.error_kind.clone()).or_default() += 1;
            if let Some(agent) = &e.agent_name {
                *by_agent.entry(agent.clone()).or_default() += 1;
            }
        }
        let mut recent: Vec<ErrorDigest> = histories
            .errors
            .iter()
            .rev()
            .take(RECENT_IN_SUMMARY)
            .map(|e| ErrorDigest {
                timestamp: e.timestamp,
                error_kind: e.error_kind.clone(),
                message: e.message.clone(),
                severity: e.severity,
            })
            .collect();
        recent.reverse();
        ErrorSummary {
            total: histories.errors.len(),
            by_severity,
            by_kind,
            by_agent,
            recent,
        }
    }

    pub fn feedback_summary(&self) -> FeedbackSummary {
        let histories = lock_or_recover(&self.histories);
        let mut by_kind: BTreeMap<FeedbackKind, usize> =
            FeedbackKind::ALL.into_iter().map(|k| (k, 0)).collect();
        let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
        for f in histories.feedback.iter() {
            *by_kind.entry(f.kind).or_default() += 1;
            if let Some(agent) = &f.agent_name {
                *by_agent.entry(agent.clone()).or_default() += 1;
            }
        }
        let mut recent: Vec<FeedbackDigest> = histories
            .feedback
            .iter()
            .rev()
            .take(RECENT_IN_SUMMARY)
            .map(|f| FeedbackDigest {
                timestamp: f.timestamp,
                kind: f.kind,
                message: f.message.clone(),
            })
            .collect();
        recent.reverse();
        FeedbackSummary {
            total: histories.feedback.len(),
            by_kind,
            by_agent,
            recent,
        }
    }

    /// 最近 limit 条错误（最新在前），可按 Agent 过滤
    pub fn recent_errors(&self, limit: usize, agent_name: Option<&str>) -> Vec<ErrorRecord> {
        lock_or_recover(&self.histories)
            .errors
            .iter()
            .rev()
            .filter(|e| agent_name.is_none() || e.agent_name.as_deref() == agent_name)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 全部错误（插入顺序）
    pub fn errors(&self) -> Vec<ErrorRecord> {
        lock_or_recover(&self.histories).errors.iter().cloned().collect()
    }

    /// 全部反馈（插入顺序）
    pub fn feedback(&self) -> Vec<FeedbackRecord> {
        lock_or_recover(&self.histories).feedback.iter().cloned().collect()
    }

    /// 清空历史；传入 agent_name 时只清该 Agent 的记录
    pub fn clear_history(&self, agent_name: Option<&str>) {
        let mut histories = lock_or_recover(&self.histories);
        match agent_name {
            Some(name) => {
                histories.errors.retain(|e| e.agent_name.as_deref() != Some(name));
                histories.feedback.retain(|f| f.agent_name.as_deref() != Some(name));
            }
            None => {
                histories.errors.clear();
                histories.feedback.clear();
            }
        }
    }

    /// 回调在锁外执行：回调内部可以再查询分级器
    fn run_callbacks(&self, record: &ErrorRecord) {
        let handlers: Vec<(CallbackToken, ErrorCallback)> = lock_or_recover(&self.callbacks)
            .registrations
            .iter()
            .filter(|r| r.severity == record.severity)
            .map(|r| (r.token, Arc::clone(&r.handler)))
            .collect();

        for (token, handler) in handlers {
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(record))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            let err = AgentError::Callback(failure);
            tracing::error!(
                token = token.0,
                severity = %record.severity,
                "Error executing callback: {}",
                err
            );
            if let Some(ledger) = &self.ledger {
                ledger.add(
                    MemoryType::SystemEvent,
                    err.to_string(),
                    record.agent_name.as_deref(),
                    into_metadata(serde_json::json!({
                        "event": "callback_failed",
                        "severity": record.severity,
                        "callback_token": token.0,
                        "error_kind": record.error_kind,
                    })),
                );
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

/// 错误链文本：首行为错误本身，其后逐级列出 source
fn render_trace(error: &AgentError) -> String {
    let mut trace = format!("{}: {}", error.kind(), error);
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        trace.push_str(&format!("\n  caused by: {}", cause));
        source = cause.source();
    }
    trace
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn transient() -> AgentError {
        AgentError::Transient("upstream 503".into())
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_handle_error_records_and_returns() {
        let classifier = ErrorClassifier::default();
        let record = classifier.handle_error(
            &transient(),
            "",
            Severity::Medium,
            Some("triage"),
            into_metadata(serde_json::json!({"attempt": 1, "operation": "chat"})),
        );
        assert_eq!(record.error_kind, "Transient");
        assert_eq!(record.message, "Transient failure: upstream 503");
        assert_eq!(record.operation.as_deref(), Some("chat"));
        assert_eq!(record.context["attempt"], 1);
        assert!(record.stack_trace.starts_with("Transient:"));
        assert_eq!(classifier.errors().len(), 1);
    }

    #[test]
    fn test_stack_trace_walks_sources() {
        let classifier = ErrorClassifier::default();
        let exhausted = AgentError::Exhausted {
            agent_name: "a".into(),
            attempts: 2,
            last: Box::new(transient()),
        };
        let record = classifier.handle_error(
            &exhausted,
            "gave up",
            Severity::Critical,
            None,
            Metadata::new(),
        );
        assert!(record.stack_trace.contains("caused by: Transient failure: upstream 503"));
    }

    #[test]
    fn test_callbacks_fire_only_for_matching_severity() {
        let classifier = ErrorClassifier::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        classifier.register_callback(Severity::Critical, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        classifier.handle_error(&transient(), "m", Severity::High, None, Metadata::new());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        classifier.handle_error(&transient(), "m", Severity::Critical, None, Metadata::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_fault_isolation() {
        let ledger = Arc::new(MemoryLedger::default());
        let classifier = ErrorClassifier::default().with_ledger(Arc::clone(&ledger));
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        classifier.register_callback(Severity::Critical, move |_| {
            o.lock().unwrap().push("first");
            anyhow::bail!("pager unreachable")
        });
        classifier.register_callback(Severity::Critical, |_| panic!("bad handler"));
        let o = Arc::clone(&order);
        classifier.register_callback(Severity::Critical, move |_| {
            o.lock().unwrap().push("third");
            Ok(())
        });

        let record = classifier.handle_error(
            &transient(),
            "m",
            Severity::Critical,
            Some("a"),
            Metadata::new(),
        );
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);

        let events = ledger.get_recent_of_type(10, MemoryType::SystemEvent, Some("a"));
        assert_eq!(events.len(), 2);
        assert!(events[1].content.contains("pager unreachable"));
        assert!(events[0].content.contains("bad handler"));
    }

    #[test]
    fn test_unregister_callback() {
        let classifier = ErrorClassifier::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let token = classifier.register_callback(Severity::High, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(classifier.callback_count(Severity::High), 1);
        assert!(classifier.unregister_callback(token));
        assert!(!classifier.unregister_callback(token));
        classifier.handle_error(&transient(), "m", Severity::High, None, Metadata::new());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_query_classifier() {
        let classifier = Arc::new(ErrorClassifier::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let (c, s) = (Arc::downgrade(&classifier), Arc::clone(&seen));
        classifier.register_callback(Severity::Critical, move |_| {
            if let Some(c) = c.upgrade() {
                s.store(c.error_summary().total, Ordering::SeqCst);
            }
            Ok(())
        });
        classifier.handle_error(&transient(), "m", Severity::Critical, None, Metadata::new());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summaries() {
        let classifier = ErrorClassifier::default();
        classifier.handle_error(&transient(), "a", Severity::Medium, Some("x"), Metadata::new());
        classifier.handle_error(&transient(), "b", Severity::High, Some("x"), Metadata::new());
        classifier.handle_error(
            &AgentError::Configuration("no key".into()),
            "c",
            Severity::Critical,
            Some("y"),
            Metadata::new(),
        );
        classifier.add_feedback(FeedbackKind::Success, "done", Some("x"), Metadata::new());
        classifier.add_feedback(FeedbackKind::Info, "note", None, Metadata::new());

        let errors = classifier.error_summary();
        assert_eq!(errors.total, 3);
        assert_eq!(errors.by_severity[&Severity::Low], 0);
        assert_eq!(errors.by_severity[&Severity::Critical], 1);
        assert_eq!(errors.by_kind["Transient"], 2);
        assert_eq!(errors.by_agent["x"], 2);
        let messages: Vec<&str> = errors.recent.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);

        let feedback = classifier.feedback_summary();
        assert_eq!(feedback.total, 2);
        assert_eq!(feedback.by_kind[&FeedbackKind::Success], 1);
        assert_eq!(feedback.by_agent.len(), 1);
        let json = serde_json::to_value(&feedback).unwrap();
        assert_eq!(json["by_type"]["success"], 1);
    }

    #[test]
    fn test_recent_errors_and_clear_history() {
        let classifier = ErrorClassifier::default();
        classifier.handle_error(&transient(), "x1", Severity::Low, Some("x"), Metadata::new());
        classifier.handle_error(&transient(), "y1", Severity::Low, Some("y"), Metadata::new());
        classifier.handle_error(&transient(), "x2", Severity::Low, Some("x"), Metadata::new());
        classifier.add_feedback(FeedbackKind::Warning, "w", Some("x"), Metadata::new());

        let recent: Vec<String> = classifier
            .recent_errors(10, Some("x"))
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(recent, vec!["x2".to_string(), "x1".to_string()]);

        classifier.clear_history(Some("x"));
        assert_eq!(classifier.errors().len(), 1);
        assert!(classifier.feedback().is_empty());
        classifier.clear_history(None);
        assert_eq!(classifier.error_summary().total, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let classifier = ErrorClassifier::new(3);
        for i in 0..5 {
            classifier.add_feedback(FeedbackKind::Info, i.to_string(), None, Metadata::new());
        }
        let kept: Vec<String> = classifier.feedback().into_iter().map(|f| f.message).collect();
        assert_eq!(kept, vec!["2", "3", "4"]);
    }
}
