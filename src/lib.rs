//! agent-keeper - Agent 调用守护层
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分级、重试升级、弹性调用、状态查询、Agent 管理
//! - **llm**: Agent 调用抽象、同步适配、响应文本提取、Mock
//! - **memory**: 有界交互账本与对话视图
//! - **observability**: tracing 初始化
//! - **web**: 只读监控 HTTP 接口（feature `web`）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{AgentError, AgentManager, InvokeOptions, ManagerBuilder, Severity};
pub use crate::llm::{AgentCapability, AgentResponse};
pub use crate::memory::{MemoryLedger, MemoryType};
