//! 调用流程集成测试：经由公开 API 走完 注册 → 调用 → 重试升级 → 状态查询

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_keeper::core::{
    AgentError, AgentManager, ChatRequest, InvokeOptions, ManagerBuilder, RetryPolicy, Severity,
};
use agent_keeper::llm::{AgentRequest, AgentResponse, BlockingAgent, MockAgent};
use agent_keeper::memory::MemoryType;
use serde_json::json;

async fn manager() -> AgentManager {
    ManagerBuilder::new()
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100)))
        .build()
        .await
}

fn count_severity(manager: &AgentManager, severity: Severity) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    manager.classifier().register_callback(severity, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    hits
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_two_failures() {
    let m = manager().await;
    m.register_agent(
        "writer",
        Arc::new(MockAgent::failing(2, AgentError::Transient("503".into()))),
    )
    .await;
    let critical = count_severity(&m, Severity::Critical);

    let started = tokio::time::Instant::now();
    let response = m
        .chat_with_retry("writer", "draft", &InvokeOptions::default())
        .await
        .unwrap();
    assert_eq!(response, AgentResponse::Text("Echo from Mock: draft".into()));
    // 100ms + 200ms 退避
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(400));
    assert_eq!(critical.load(Ordering::SeqCst), 0);

    let severities: Vec<Severity> = m.classifier().errors().iter().map(|e| e.severity).collect();
    assert_eq!(severities, vec![Severity::Medium, Severity::Medium]);

    // 单次调用的记录顺序：输入、两条错误、响应
    let types: Vec<MemoryType> = m
        .ledger()
        .export()
        .entries
        .iter()
        .filter(|e| e.entry_type != MemoryType::SystemEvent)
        .map(|e| e.entry_type)
        .collect();
    assert_eq!(
        types,
        vec![
            MemoryType::UserInput,
            MemoryType::Error,
            MemoryType::Error,
            MemoryType::AgentResponse
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_escalates_to_single_critical() {
    let m = manager().await;
    m.register_agent(
        "flaky",
        Arc::new(MockAgent::failing(5, AgentError::Timeout(Duration::from_secs(1)))),
    )
    .await;
    let high = count_severity(&m, Severity::High);
    let critical = count_severity(&m, Severity::Critical);

    let err = m
        .chat_with_retry("flaky", "hi", &InvokeOptions::default())
        .await
        .unwrap_err();
    match err {
        AgentError::Exhausted { attempts, ref last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(**last, AgentError::Timeout(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(high.load(Ordering::SeqCst), 1);
    assert_eq!(critical.load(Ordering::SeqCst), 1);

    let status = m.system_status().await;
    assert_eq!(status.errors.total, 4);
    assert_eq!(status.errors.by_severity[&Severity::Medium], 2);
    assert_eq!(status.errors.by_severity[&Severity::High], 1);
    assert_eq!(status.errors.by_severity[&Severity::Critical], 1);
    assert_eq!(status.feedback.total, 0);
}

#[tokio::test]
async fn test_blocking_backend_and_history() {
    let m = manager().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    m.register_agent(
        "sync",
        Arc::new(BlockingAgent::new(move |req: &AgentRequest| {
            seen_in.lock().unwrap().push(req.history.len());
            Ok(AgentResponse::Structured(json!({
                "choices": [{ "message": { "content": format!("re: {}", req.input) } }]
            })))
        })),
    )
    .await;

    let opts = InvokeOptions::default().with_history();
    m.chat_with_retry("sync", "one", &opts).await.unwrap();
    let text = m.chat_text("sync", "two", &opts).await.unwrap();
    assert_eq!(text, "re: two");
    // 第二次调用能看到第一次的问答
    assert_eq!(*seen.lock().unwrap(), vec![0, 2]);

    let ctx = m.agent_context("sync");
    let contents: Vec<&str> = ctx
        .conversation_history
        .iter()
        .map(|msg| msg.content.as_str())
        .collect();
    assert_eq!(contents, vec!["one", "re: one", "two", "re: two"]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_calls_keep_per_call_order() {
    let m = manager().await;
    m.register_agent(
        "a",
        Arc::new(MockAgent::failing(1, AgentError::RateLimited { retry_after_ms: 20 })),
    )
    .await;
    m.register_agent("b", Arc::new(MockAgent::echo())).await;

    let results = m
        .chat_multiple(vec![ChatRequest::new("a", "x"), ChatRequest::new("b", "y")])
        .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let a_types: Vec<MemoryType> = m
        .ledger()
        .get_recent(10, Some("a"))
        .into_iter()
        .rev()
        .map(|e| e.entry_type)
        .collect();
    assert_eq!(
        a_types,
        vec![
            MemoryType::SystemEvent,
            MemoryType::UserInput,
            MemoryType::Error,
            MemoryType::AgentResponse
        ]
    );
    assert_eq!(m.system_status().await.feedback.total, 2);
}

#[tokio::test]
async fn test_callback_failure_does_not_reach_caller() {
    let m = manager().await;
    m.classifier().register_callback(Severity::Critical, |_| {
        Err(anyhow::anyhow!("pager offline"))
    });
    let after = count_severity(&m, Severity::Critical);

    let err = m
        .chat_with_retry("ghost", "hi", &InvokeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, AgentError::AgentNotFound("ghost".into()));
    assert_eq!(after.load(Ordering::SeqCst), 1);
}
