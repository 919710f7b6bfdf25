//! 核心层：错误与恢复、状态投影、周期任务调度、优雅关闭

pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use error::{LiveError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{LivePhase, LiveSnapshot};
pub use task_scheduler::{pick_excluding, PeriodicTaskScheduler, ScheduleHandle};
