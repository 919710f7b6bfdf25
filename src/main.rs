//! Lumina - 自刷新直播会话编排器
//!
//! 入口：初始化日志、加载配置、基于 Mock 生成服务启动直播会话，并定期输出状态快照，直到收到关闭信号。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lumina::config::{load_config, AppConfig};
use lumina::core::shutdown::{run_with_graceful_shutdown, LiveSessionCleanup};
use lumina::core::{ShutdownCoordinator, ShutdownManager};
use lumina::service::{ContentService, MockContentService, TimedContentService};
use lumina::{observability, RefreshCycleController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mock = MockContentService::new()
        .with_latency(Duration::from_millis(cfg.service.mock_latency_ms));
    let service: Arc<dyn ContentService> =
        Arc::new(TimedContentService::from_config(Arc::new(mock), &cfg.service));

    let controller = Arc::new(
        RefreshCycleController::start(service, &cfg).context("Failed to start live session")?,
    );
    controller.append_system(format!(
        "Welcome to {}",
        cfg.app.name.as_deref().unwrap_or("the live session")
    ));

    let manager = Arc::new(ShutdownManager::new());
    if let Some(after) = cfg.app.run_for() {
        manager.shutdown_after(after);
    }
    let mut coordinator = ShutdownCoordinator::new(manager, cfg.app.cleanup_timeout());
    coordinator.register(LiveSessionCleanup::new(controller.clone()));

    let every = Duration::from_secs(cfg.app.snapshot_log_secs.max(1));
    let reason = run_with_graceful_shutdown(&coordinator, log_snapshots(controller, every)).await;
    tracing::info!("Exited ({:?})", reason);
    Ok(())
}

/// 定期输出快照；每次顺带发出一个光球，模拟观众互动
async fn log_snapshots(controller: Arc<RefreshCycleController>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if controller.is_stopped() {
            break;
        }
        controller.send_light();

        let snapshot = controller.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => tracing::info!("snapshot {}", json),
            Err(e) => tracing::warn!("Snapshot serialization failed: {}", e),
        }
        tracing::info!(
            "{} messages, {} live events, summary: {}",
            controller.messages().len(),
            controller.events().len(),
            controller
                .summary()
                .map(|s| s.text)
                .unwrap_or_else(|| "-".to_string())
        );
    }
}
