//! 直播会话错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 LiveError 决定 SurfaceToUser / ContinueWithoutAudio / SkipUntilNextTick / Abort。

use serde::Serialize;
use thiserror::Error;

use crate::service::ServiceError;

/// 直播会话中可能出现的错误（配额、生成失败、降级、周期任务瞬时失败等）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LiveError {
    /// 上游配额或速率限制，用户可见，建议稍后重试
    #[error("Generation quota exceeded, please try again later")]
    QuotaExceeded,

    /// 上游通用失败，用户可见，建议重试
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// 并非失败：画面成功、音频失败，会话无声继续
    #[error("Audio unavailable: {0}")]
    DegradedMedia(String),

    /// 周期任务底层调用失败，不展示给用户，等待下一次 tick
    #[error("Periodic task '{task}' failed: {reason}")]
    SchedulerTransient { task: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    /// 控制器已停止，命令无法投递
    #[error("Live session stopped")]
    Stopped,
}

impl LiveError {
    /// 致命错误会使当前周期失败并展示给用户
    pub fn is_fatal_to_cycle(&self) -> bool {
        matches!(self, LiveError::QuotaExceeded | LiveError::GenerationFailed(_))
    }

    /// 周期任务失败统一转换为 SchedulerTransient
    pub fn transient(task: &str, err: impl std::fmt::Display) -> Self {
        LiveError::SchedulerTransient {
            task: task.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<ServiceError> for LiveError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::QuotaExceeded => LiveError::QuotaExceeded,
            other => LiveError::GenerationFailed(other.to_string()),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 展示给用户（配额与通用失败文案不同）
    SurfaceToUser(String),
    /// 画面继续播放，静默去掉音频
    ContinueWithoutAudio,
    /// 记录日志，等待下一次定时 tick
    SkipUntilNextTick,
    /// 终止当前操作
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_service_quota_maps_to_quota() {
        let err: LiveError = ServiceError::QuotaExceeded.into();
        assert_eq!(err, LiveError::QuotaExceeded);
        assert!(err.is_fatal_to_cycle());
    }

    #[test]
    fn test_service_timeout_maps_to_generic() {
        let err: LiveError = ServiceError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, LiveError::GenerationFailed(_)));
    }

    #[test]
    fn test_degraded_is_not_fatal() {
        assert!(!LiveError::DegradedMedia("no audio".into()).is_fatal_to_cycle());
        assert!(!LiveError::transient("overlay", "boom").is_fatal_to_cycle());
    }
}
