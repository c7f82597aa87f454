//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KEEPER__*` 覆盖（双下划线表示嵌套，如 `KEEPER__RETRY__MAX_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::classifier::DEFAULT_MAX_HISTORY;
use crate::core::recovery::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::memory::DEFAULT_MAX_ENTRIES;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub memory: MemorySection,
    pub retry: RetrySection,
    pub errors: ErrorsSection,
}

/// [server] 段：监控接口监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// [memory] 段：账本容量
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// [retry] 段：尝试次数、退避基数（毫秒）、单次尝试超时（毫秒，不设则不限）
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_ms: None,
        }
    }
}

/// [errors] 段：错误与反馈历史容量
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorsSection {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl Default for ErrorsSection {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
        );
        match self.retry.attempt_timeout_ms {
            Some(ms) => policy.with_attempt_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

/// 从 config 目录加载配置，环境变量 KEEPER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KEEPER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, skipping", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KEEPER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
