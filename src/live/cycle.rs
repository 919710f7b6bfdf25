//! 刷新周期与媒体任务的数据模型
//!
//! RefreshCycle 一旦以 Arc 发布便不再修改；新的状态总是发布新的值。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::LiveError;
use crate::service::{release_media, BaseContent, ContentService, MediaHandle, MediaKind, ServiceError};

/// 周期 ID（单调递增，从 1 开始）
pub type CycleId = u64;

/// 周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStatus {
    Pending,
    SettledOk,
    SettledDegraded,
    SettledFailed,
}

/// 单个媒体任务的终态
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum MediaOutcome {
    Pending,
    Ok(MediaHandle),
    QuotaExceeded,
    Failed(String),
}

impl MediaOutcome {
    pub fn handle(&self) -> Option<&MediaHandle> {
        match self {
            MediaOutcome::Ok(handle) => Some(handle),
            _ => None,
        }
    }

    /// 失败原因（仅用于观测）
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            MediaOutcome::QuotaExceeded => Some(ServiceError::QuotaExceeded.to_string()),
            MediaOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

impl From<Result<MediaHandle, ServiceError>> for MediaOutcome {
    fn from(result: Result<MediaHandle, ServiceError>) -> Self {
        match result {
            Ok(handle) => MediaOutcome::Ok(handle),
            Err(ServiceError::QuotaExceeded) => MediaOutcome::QuotaExceeded,
            Err(other) => MediaOutcome::Failed(other.to_string()),
        }
    }
}

/// 一个周期内的媒体任务（画面或音频）
#[derive(Clone, Debug, Serialize)]
pub struct MediaTask {
    pub kind: MediaKind,
    /// 0-100，画面任务单调不减
    pub progress: u8,
    pub outcome: MediaOutcome,
}

/// 协调器对一个周期给出的结果
#[derive(Clone, Debug)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub error: Option<LiveError>,
    pub visual: MediaTask,
    pub audio: MediaTask,
}

/// 一次完整刷新（基础内容 + 画面 + 音频）
#[derive(Clone, Debug, Serialize)]
pub struct RefreshCycle {
    pub id: CycleId,
    pub theme: String,
    pub base: Option<BaseContent>,
    pub status: CycleStatus,
    pub error: Option<LiveError>,
    pub visual: Option<MediaHandle>,
    pub audio: Option<MediaHandle>,
    /// 音频失败原因，只用于观测，不影响状态
    pub audio_error: Option<String>,
    /// 控制器处理结算的顺序号；未发布时为 0
    pub settlement_seq: u64,
    #[serde(skip)]
    pub started_at: Instant,
    #[serde(skip)]
    pub settled_at: Option<Instant>,
}

impl RefreshCycle {
    pub fn pending(id: CycleId, started_at: Instant) -> Self {
        Self {
            id,
            theme: String::new(),
            base: None,
            status: CycleStatus::Pending,
            error: None,
            visual: None,
            audio: None,
            audio_error: None,
            settlement_seq: 0,
            started_at,
            settled_at: None,
        }
    }

    /// 基础内容获取失败时的结算
    pub fn fail(&mut self, error: LiveError) {
        self.status = CycleStatus::SettledFailed;
        self.error = Some(error);
    }

    /// 吸收协调器结果；失败周期不持有任何媒体
    pub fn apply(&mut self, outcome: CycleOutcome) {
        self.status = outcome.status;
        self.error = outcome.error;
        self.audio_error = outcome.audio.outcome.failure_reason();
        if outcome.status != CycleStatus::SettledFailed {
            self.visual = outcome.visual.outcome.handle().cloned();
            self.audio = outcome.audio.outcome.handle().cloned();
        }
    }

    /// 释放本周期持有的所有媒体句柄（幂等）
    pub fn release(&self, service: &dyn ContentService) -> usize {
        [self.visual.as_ref(), self.audio.as_ref()]
            .into_iter()
            .filter(|h| release_media(service, *h))
            .count()
    }
}

/// 画面任务进度（带周期 ID，旧周期不会覆盖新周期）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VisualProgress {
    pub cycle: CycleId,
    pub percent: u8,
}

/// 单个周期的进度上报端
#[derive(Clone)]
pub struct ProgressSink {
    cycle: CycleId,
    tx: Arc<watch::Sender<VisualProgress>>,
}

impl ProgressSink {
    pub fn new(cycle: CycleId, tx: Arc<watch::Sender<VisualProgress>>) -> Self {
        Self { cycle, tx }
    }

    /// 上报进度；旧周期或回退的值被忽略，返回是否发布
    pub fn report(&self, percent: u8) -> bool {
        let percent = percent.min(100);
        let cycle = self.cycle;
        self.tx.send_if_modified(|current| {
            let newer_cycle = cycle > current.cycle;
            let forward = cycle == current.cycle && percent > current.percent;
            if newer_cycle || forward {
                *current = VisualProgress { cycle, percent };
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MockContentService;

    #[test]
    fn test_progress_ignores_regressions_and_old_cycles() {
        let (tx, rx) = watch::channel(VisualProgress::default());
        let tx = Arc::new(tx);
        let first = ProgressSink::new(1, tx.clone());
        let second = ProgressSink::new(2, tx.clone());

        assert!(first.report(40));
        assert!(!first.report(30));
        assert!(second.report(0));
        assert!(!first.report(90));
        assert!(second.report(250));
        assert_eq!(*rx.borrow(), VisualProgress { cycle: 2, percent: 100 });
    }

    #[test]
    fn test_failed_outcome_keeps_no_media() {
        let mut cycle = RefreshCycle::pending(1, Instant::now());
        let audio = MediaHandle::new(MediaKind::Audio, "blob:a");
        cycle.apply(CycleOutcome {
            status: CycleStatus::SettledFailed,
            error: Some(LiveError::QuotaExceeded),
            visual: MediaTask {
                kind: MediaKind::Visual,
                progress: 20,
                outcome: MediaOutcome::QuotaExceeded,
            },
            audio: MediaTask {
                kind: MediaKind::Audio,
                progress: 0,
                outcome: MediaOutcome::Ok(audio),
            },
        });
        assert!(cycle.visual.is_none());
        assert!(cycle.audio.is_none());
        assert_eq!(cycle.status, CycleStatus::SettledFailed);
    }

    #[test]
    fn test_release_counts_each_handle_once() {
        let service = MockContentService::new();
        let mut cycle = RefreshCycle::pending(1, Instant::now());
        cycle.visual = Some(MediaHandle::new(MediaKind::Visual, "blob:v"));
        assert_eq!(cycle.release(&service), 1);
        assert_eq!(cycle.release(&service), 0);
    }
}
