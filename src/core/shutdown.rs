//! 优雅关闭
//!
//! 关闭可能来自 Ctrl+C、SIGTERM 或演示时长到期；只记录第一个原因。
//! 关闭后依次执行清理：停止直播会话（取消周期任务、释放媒体）。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::live::RefreshCycleController;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 配置的运行时长到期
    Elapsed,
}

/// 关闭信号：取消 token + 首个关闭原因
pub struct ShutdownManager {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason,
        }
    }

    /// 触发关闭；之后的原因被忽略
    pub fn shutdown(&self, reason: ShutdownReason) {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!("Shutdown requested: {:?}", reason);
            self.token.cancel();
        }
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与 SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
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
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }

    /// 运行 `after` 后自动关闭；关闭先发生时计时器随之退出
    pub fn shutdown_after(self: &Arc<Self>, after: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = manager.token.cancelled() => {}
                _ = tokio::time::sleep(after) => manager.shutdown(ShutdownReason::Elapsed),
            }
        });
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，每个任务单独超时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Box<dyn ShutdownCleanup>>,
    cleanup_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>, cleanup_timeout: Duration) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            cleanup_timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Box::new(task));
    }

    pub async fn run_cleanup(&self) {
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.cleanup_timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup '{}' done", name),
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", name, e),
                Err(_) => tracing::warn!(
                    "Cleanup '{}' timed out after {:?}",
                    name,
                    self.cleanup_timeout
                ),
            }
        }
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 停止直播会话
pub struct LiveSessionCleanup {
    controller: Arc<RefreshCycleController>,
}

impl LiveSessionCleanup {
    pub fn new(controller: Arc<RefreshCycleController>) -> Self {
        Self { controller }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for LiveSessionCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.controller.stop().await;
        let snapshot = self.controller.snapshot();
        tracing::info!(
            "Live session closed in phase {:?} with {} cycles in flight",
            snapshot.phase,
            snapshot.in_flight
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "live-session"
    }
}

/// 运行 app 直到其结束或收到关闭信号，然后执行清理；返回关闭原因（app 自行结束时为 None）
pub async fn run_with_graceful_shutdown<F>(
    coordinator: &ShutdownCoordinator,
    app: F,
) -> Option<ShutdownReason>
where
    F: Future<Output = ()>,
{
    coordinator.manager().install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("Live session finished on its own"),
        _ = coordinator.manager().wait_for_shutdown() => {}
    }

    coordinator.run_cleanup().await;
    coordinator.manager().reason()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::LivePhase;
    use crate::service::MockContentService;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::Elapsed);
        manager.shutdown(ShutdownReason::Signal);
        assert_eq!(manager.reason(), Some(ShutdownReason::Elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_elapses() {
        let manager = Arc::new(ShutdownManager::new());
        manager.shutdown_after(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(manager.reason(), None);
        manager.wait_for_shutdown().await;
        assert_eq!(manager.reason(), Some(ShutdownReason::Elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_session_cleanup_stops_controller() {
        let mock = Arc::new(MockContentService::new());
        let controller =
            Arc::new(RefreshCycleController::start(mock, &AppConfig::default()).unwrap());

        let manager = Arc::new(ShutdownManager::new());
        let mut coordinator = ShutdownCoordinator::new(manager.clone(), Duration::from_secs(5));
        coordinator.register(LiveSessionCleanup::new(controller.clone()));
        manager.shutdown_after(Duration::from_secs(10));

        let reason = run_with_graceful_shutdown(&coordinator, std::future::pending()).await;
        assert_eq!(reason, Some(ShutdownReason::Elapsed));
        assert!(controller.is_stopped());
        assert_eq!(controller.snapshot().phase, LivePhase::Stopped);
    }
}
