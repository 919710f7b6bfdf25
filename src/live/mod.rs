//! 直播会话层：刷新周期、媒体协调、短时事件、聊天与叠加文字

pub mod chat;
pub mod controller;
pub mod cycle;
pub mod ephemeral;
pub mod media;
pub mod overlay;

pub use chat::{ChatMessage, ChatSessionManager, ChatSettings, ChatSummary, Sender};
pub use controller::RefreshCycleController;
pub use cycle::{
    CycleId, CycleOutcome, CycleStatus, MediaOutcome, MediaTask, ProgressSink, RefreshCycle,
    VisualProgress,
};
pub use ephemeral::{
    EphemeralEvent, EphemeralEventRegistry, EventId, EventKind, EventPayload, EventTtls, OrbStyle,
};
pub use media::{classify, CycleContext, MediaGenerationCoordinator};
pub use overlay::{AffirmationRotation, OverlayPosition, OverlayState};
