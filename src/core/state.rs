//! 状态定义：LiveSnapshot 投影
//!
//! 观察者只持有轻量的 LiveSnapshot（阶段、当前周期、叠加文字、肯定语、错误）；
//! 完整状态由控制器独占维护，每次变化发布一个新的快照。

use std::sync::Arc;

use serde::Serialize;

use crate::live::{CycleStatus, OverlayState, RefreshCycle};

/// 会话阶段（展示层投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LivePhase {
    /// 尚无任何周期结算
    Idle,
    /// 至少有一个周期在进行中
    Refreshing,
    Live,
    /// 当前周期失败
    Failed,
    Stopped,
}

/// 展示层看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct LiveSnapshot {
    pub phase: LivePhase,
    pub current: Option<Arc<RefreshCycle>>,
    pub in_flight: usize,
    pub overlay: Option<OverlayState>,
    pub affirmation: Option<String>,
    pub error_message: Option<String>,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        Self {
            phase: LivePhase::Idle,
            current: None,
            in_flight: 0,
            overlay: None,
            affirmation: None,
            error_message: None,
        }
    }
}

impl LiveSnapshot {
    pub fn theme(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|c| c.theme.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn status(&self) -> Option<CycleStatus> {
        self.current.as_ref().map(|c| c.status)
    }
}

/// 由内部状态推导阶段
pub fn derive_phase(stopped: bool, in_flight: usize, current: Option<&RefreshCycle>) -> LivePhase {
    if stopped {
        return LivePhase::Stopped;
    }
    if in_flight > 0 {
        return LivePhase::Refreshing;
    }
    match current.map(|c| c.status) {
        None | Some(CycleStatus::Pending) => LivePhase::Idle,
        Some(CycleStatus::SettledFailed) => LivePhase::Failed,
        Some(CycleStatus::SettledOk) | Some(CycleStatus::SettledDegraded) => LivePhase::Live,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_phase_derivation() {
        let mut cycle = RefreshCycle::pending(1, Instant::now());
        assert_eq!(derive_phase(false, 0, None), LivePhase::Idle);
        assert_eq!(derive_phase(false, 1, Some(&cycle)), LivePhase::Refreshing);

        cycle.status = CycleStatus::SettledDegraded;
        assert_eq!(derive_phase(false, 0, Some(&cycle)), LivePhase::Live);

        cycle.status = CycleStatus::SettledFailed;
        assert_eq!(derive_phase(false, 0, Some(&cycle)), LivePhase::Failed);
        assert_eq!(derive_phase(true, 2, Some(&cycle)), LivePhase::Stopped);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = LiveSnapshot::default();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"phase\":\"Idle\""));
        assert_eq!(snapshot.theme(), None);
    }
}
