//! 核心层：错误与恢复、错误分级、弹性调用、状态查询、Agent 管理、优雅关闭

pub mod builder;
pub mod classifier;
pub mod error;
pub mod invoker;
pub mod manager;
pub mod recovery;
pub mod shutdown;
pub mod status;

pub use builder::ManagerBuilder;
pub use classifier::{
    CallbackToken, ErrorClassifier, ErrorRecord, ErrorSummary, FeedbackKind, FeedbackRecord,
    FeedbackSummary, Severity,
};
pub use error::{AgentError, RecoveryAction};
pub use invoker::{InvokeOptions, ResilientInvoker};
pub use manager::{AgentManager, ChatRequest};
pub use recovery::{RecoveryEngine, RetryPolicy};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use status::{AgentContext, StatusQuery, SystemStatus};
