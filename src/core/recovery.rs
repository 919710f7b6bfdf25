//! 错误恢复引擎
//!
//! 根据 LiveError 类型返回 RecoveryAction，供控制器决定是展示给用户、降级播放还是静默跳过。

use crate::core::{LiveError, RecoveryAction};

/// 用户可见的配额提示
pub const QUOTA_MESSAGE: &str =
    "The live generator has reached its usage limit. Please try refreshing again in a few minutes.";

/// 用户可见的通用失败提示
pub const FAILURE_MESSAGE: &str = "Could not refresh the live session. Please try again.";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &LiveError) -> RecoveryAction {
        match err {
            LiveError::QuotaExceeded => RecoveryAction::SurfaceToUser(QUOTA_MESSAGE.to_string()),
            LiveError::GenerationFailed(reason) => {
                tracing::debug!("Surfacing generation failure: {}", reason);
                RecoveryAction::SurfaceToUser(FAILURE_MESSAGE.to_string())
            }
            LiveError::DegradedMedia(_) => RecoveryAction::ContinueWithoutAudio,
            LiveError::SchedulerTransient { task, reason } => {
                tracing::warn!("Periodic task '{}' skipped: {}", task, reason);
                RecoveryAction::SkipUntilNextTick
            }
            LiveError::Config(_) | LiveError::Stopped => RecoveryAction::Abort,
        }
    }

    /// 需要展示给用户的文案；非展示类错误返回 None
    pub fn user_message(&self, err: &LiveError) -> Option<String> {
        match self.handle(err) {
            RecoveryAction::SurfaceToUser(msg) => Some(msg),
            _ => None,
        }
    }
}
