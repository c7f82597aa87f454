//! 优雅关闭
//!
//! 监听 Ctrl+C / SIGTERM，通过 CancellationToken 通知 HTTP 服务停止接收新连接。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子 token：服务或后台任务各持一份
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(?reason, "Initiating graceful shutdown");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}
