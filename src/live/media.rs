//! 媒体生成协调器：一个周期内画面与音频两个任务的并发与汇合
//!
//! 两个任务同时启动，等待两者都到达终态后才返回（fan-in，互不取消）。
//! 画面结果决定周期状态；音频失败只会让周期降级，不会让周期失败。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::core::LiveError;
use crate::live::cycle::{CycleId, CycleOutcome, CycleStatus, MediaOutcome, MediaTask, ProgressSink};
use crate::service::{release_media, BaseContent, ContentService, MediaKind};

/// 单个周期的输入
pub struct CycleContext {
    pub id: CycleId,
    pub base: BaseContent,
    pub progress: ProgressSink,
}

/// 根据两个任务的终态给出周期状态
pub fn classify(visual: &MediaOutcome, audio: &MediaOutcome) -> (CycleStatus, Option<LiveError>) {
    match visual {
        MediaOutcome::QuotaExceeded => (CycleStatus::SettledFailed, Some(LiveError::QuotaExceeded)),
        MediaOutcome::Failed(reason) => (
            CycleStatus::SettledFailed,
            Some(LiveError::GenerationFailed(reason.clone())),
        ),
        MediaOutcome::Pending => (
            CycleStatus::SettledFailed,
            Some(LiveError::GenerationFailed("visual task did not finish".to_string())),
        ),
        MediaOutcome::Ok(_) => match audio {
            MediaOutcome::Ok(_) => (CycleStatus::SettledOk, None),
            MediaOutcome::Pending => (
                CycleStatus::SettledDegraded,
                Some(LiveError::DegradedMedia("audio task did not finish".to_string())),
            ),
            failed => (
                CycleStatus::SettledDegraded,
                Some(LiveError::DegradedMedia(
                    failed.failure_reason().unwrap_or_default(),
                )),
            ),
        },
    }
}

/// 媒体生成协调器
pub struct MediaGenerationCoordinator {
    service: Arc<dyn ContentService>,
}

impl MediaGenerationCoordinator {
    pub fn new(service: Arc<dyn ContentService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, ctx: CycleContext) -> CycleOutcome {
        let theme = ctx.base.theme.as_str();
        let prompt = ctx.base.visual_prompt();
        let last_progress = AtomicU8::new(0);
        let on_progress = |percent: u8| {
            last_progress.fetch_max(percent.min(100), Ordering::Relaxed);
            ctx.progress.report(percent);
        };

        tracing::info!("Cycle {}: generating visual and audio for '{}'", ctx.id, theme);
        let (visual, audio) = tokio::join!(
            self.service.generate_visual(&prompt, theme, &on_progress),
            self.service.generate_audio(&ctx.base.audio_prompt, theme),
        );

        let visual = MediaTask {
            kind: MediaKind::Visual,
            progress: last_progress.load(Ordering::Relaxed),
            outcome: MediaOutcome::from(visual),
        };
        let audio_done = audio.is_ok();
        let audio = MediaTask {
            kind: MediaKind::Audio,
            progress: if audio_done { 100 } else { 0 },
            outcome: MediaOutcome::from(audio),
        };

        let (status, error) = classify(&visual.outcome, &audio.outcome);
        match status {
            CycleStatus::SettledFailed => {
                tracing::warn!(
                    "Cycle {}: visual generation failed ({:?}), audio {:?}",
                    ctx.id,
                    error,
                    audio.outcome.failure_reason()
                );
                // 失败周期不会被播放，已生成的音频立即释放
                release_media(self.service.as_ref(), audio.outcome.handle());
            }
            CycleStatus::SettledDegraded => {
                tracing::warn!(
                    "Cycle {}: audio unavailable, continuing without it: {:?}",
                    ctx.id,
                    audio.outcome.failure_reason()
                );
            }
            _ => {
                tracing::info!("Cycle {}: visual and audio ready", ctx.id);
            }
        }

        CycleOutcome {
            status,
            error,
            visual,
            audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::cycle::VisualProgress;
    use crate::service::{sample_base_content, MediaHandle, MockContentService, ServiceError};
    use std::time::Duration;
    use tokio::sync::watch;

    fn ok() -> MediaOutcome {
        MediaOutcome::Ok(MediaHandle::new(MediaKind::Visual, "blob:x"))
    }

    #[test]
    fn test_classify_visual_quota_wins_over_audio() {
        for audio in [ok(), MediaOutcome::QuotaExceeded, MediaOutcome::Failed("x".into())] {
            let (status, err) = classify(&MediaOutcome::QuotaExceeded, &audio);
            assert_eq!(status, CycleStatus::SettledFailed);
            assert_eq!(err, Some(LiveError::QuotaExceeded));
        }
    }

    #[test]
    fn test_classify_audio_failure_only_degrades() {
        for audio in [MediaOutcome::QuotaExceeded, MediaOutcome::Failed("tts".into())] {
            let (status, err) = classify(&ok(), &audio);
            assert_eq!(status, CycleStatus::SettledDegraded);
            assert!(matches!(err, Some(LiveError::DegradedMedia(_))));
        }
    }

    #[test]
    fn test_classify_generic_visual_failure() {
        let (status, err) = classify(&MediaOutcome::Failed("500".into()), &ok());
        assert_eq!(status, CycleStatus::SettledFailed);
        assert_eq!(err, Some(LiveError::GenerationFailed("500".into())));
    }

    #[test]
    fn test_classify_both_ok() {
        assert_eq!(classify(&ok(), &ok()), (CycleStatus::SettledOk, None));
    }

    fn context(id: CycleId) -> (CycleContext, watch::Receiver<VisualProgress>) {
        let (tx, rx) = watch::channel(VisualProgress::default());
        let ctx = CycleContext {
            id,
            base: sample_base_content(0),
            progress: ProgressSink::new(id, Arc::new(tx)),
        };
        (ctx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_both_tasks() {
        let mock = Arc::new(MockContentService::new());
        mock.push_visual(Duration::from_secs(2), Ok(()));
        mock.push_audio(Duration::from_secs(30), Ok(()));
        let coordinator = MediaGenerationCoordinator::new(mock.clone());

        let (ctx, progress) = context(1);
        let started = tokio::time::Instant::now();
        let outcome = coordinator.run(ctx).await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(outcome.status, CycleStatus::SettledOk);
        assert_eq!(outcome.visual.progress, 100);
        assert_eq!(*progress.borrow(), VisualProgress { cycle: 1, percent: 100 });
    }

    #[tokio::test]
    async fn test_run_degraded_keeps_visual() {
        let mock = Arc::new(MockContentService::new());
        mock.push_audio(Duration::ZERO, Err(ServiceError::Failed("tts offline".into())));
        let coordinator = MediaGenerationCoordinator::new(mock.clone());

        let (ctx, _progress) = context(1);
        let outcome = coordinator.run(ctx).await;

        assert_eq!(outcome.status, CycleStatus::SettledDegraded);
        assert!(outcome.visual.outcome.handle().is_some());
        assert!(outcome.audio.outcome.handle().is_none());
        assert_eq!(mock.audio_calls(), 1);
    }

    #[tokio::test]
    async fn test_run_failed_visual_releases_audio() {
        let mock = Arc::new(MockContentService::new());
        mock.push_visual(Duration::ZERO, Err(ServiceError::QuotaExceeded));
        let coordinator = MediaGenerationCoordinator::new(mock.clone());

        let (ctx, _progress) = context(1);
        let outcome = coordinator.run(ctx).await;

        assert_eq!(outcome.status, CycleStatus::SettledFailed);
        assert_eq!(outcome.error, Some(LiveError::QuotaExceeded));
        let audio = outcome.audio.outcome.handle().unwrap();
        assert!(audio.is_released());
        assert_eq!(mock.released_ids(), vec![audio.id().to_string()]);
    }
}
