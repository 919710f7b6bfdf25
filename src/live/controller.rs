//! 刷新周期控制器：直播会话的顶层驱动
//!
//! 负责：持有当前周期、按固定周期与手动请求触发刷新、在结算时替换当前周期并释放旧媒体、
//! 为新主题重新挂载主持人提问 / 动态叠加 / 肯定语轮播三个周期任务。
//!
//! 所有可变状态由一个后台任务独占（CycleOwner）；展示层请求、周期结算和周期任务结果
//! 都以 Command 形式进入同一通道，周期任务回调只按值持有 ScheduleContext。

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::{AppConfig, LiveSection, SettlementPolicy};
use crate::core::state::derive_phase;
use crate::core::{LiveError, LiveSnapshot, PeriodicTaskScheduler, RecoveryEngine};
use crate::live::chat::{ChatMessage, ChatSessionManager, ChatSummary};
use crate::live::cycle::{CycleId, ProgressSink, RefreshCycle, VisualProgress};
use crate::live::ephemeral::{EphemeralEvent, EphemeralEventRegistry, EventId};
use crate::live::media::{CycleContext, MediaGenerationCoordinator};
use crate::live::overlay::{AffirmationRotation, OverlayState};
use crate::service::ContentService;

/// 进入状态拥有者的命令
#[derive(Debug)]
enum Command {
    RequestRefresh,
    CycleSettled(Box<RefreshCycle>),
    /// 动态叠加文字；generation 不匹配说明来自旧主题，直接丢弃
    OverlayQuote { generation: u64, text: String },
    RotateAffirmation { generation: u64 },
    Stop(Option<oneshot::Sender<()>>),
}

/// 周期任务回调按值持有的上下文
#[derive(Clone, Debug)]
struct ScheduleContext {
    generation: u64,
    cycle: CycleId,
    theme: String,
}

/// 控制器句柄：展示层通过它发起请求并读取状态
pub struct RefreshCycleController {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<LiveSnapshot>,
    progress_rx: watch::Receiver<VisualProgress>,
    chat: ChatSessionManager,
    events: Arc<EphemeralEventRegistry>,
}

impl RefreshCycleController {
    /// 启动会话：立即开始第一个周期并挂上固定周期的刷新定时器与聊天摘要
    pub fn start(service: Arc<dyn ContentService>, cfg: &AppConfig) -> Result<Self, LiveError> {
        cfg.validate()?;
        let events = Arc::new(EphemeralEventRegistry::new(cfg.events.ttls())?);
        let chat = ChatSessionManager::new(service.clone(), cfg.live.chat_settings());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LiveSnapshot::default());
        let (progress_tx, progress_rx) = watch::channel(VisualProgress::default());

        let owner = CycleOwner {
            coordinator: Arc::new(MediaGenerationCoordinator::new(service.clone())),
            service,
            chat: chat.clone(),
            settings: cfg.live.clone(),
            recovery: RecoveryEngine::new(),
            cmd_tx: cmd_tx.clone(),
            state_tx,
            progress_tx: Arc::new(progress_tx),
            session_schedules: PeriodicTaskScheduler::new(),
            content_schedules: PeriodicTaskScheduler::new(),
            next_cycle_id: 0,
            in_flight: HashSet::new(),
            current: None,
            settlement_seq: 0,
            generation: 0,
            overlay: None,
            affirmations: AffirmationRotation::default(),
            stopped: false,
        };
        owner.arm_session_schedules();
        tokio::spawn(owner.run(cmd_rx));

        cmd_tx
            .send(Command::RequestRefresh)
            .map_err(|_| LiveError::Stopped)?;
        tracing::info!(
            "Live session started (refresh every {}s, policy {:?})",
            cfg.live.cycle_interval_secs,
            cfg.live.settlement_policy
        );

        Ok(Self {
            cmd_tx,
            state_rx,
            progress_rx,
            chat,
            events,
        })
    }

    /// 立即发起一个额外周期，可与定时刷新并发
    pub fn request_refresh(&self) -> Result<(), LiveError> {
        self.cmd_tx
            .send(Command::RequestRefresh)
            .map_err(|_| LiveError::Stopped)
    }

    /// 停止所有定时器并释放持有的媒体；重复调用为 no-op
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(Some(ack_tx))).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    pub fn append_user(&self, text: impl Into<String>) -> ChatMessage {
        self.chat.append_user(text)
    }

    pub fn append_system(&self, text: impl Into<String>) -> ChatMessage {
        self.chat.append_system(text)
    }

    pub fn add_intention(&self, text: &str) -> Option<EventId> {
        self.events.add_intention(text)
    }

    pub fn send_light(&self) -> EventId {
        self.events.send_light()
    }

    /// 当前可见的短时事件
    pub fn events(&self) -> Vec<EphemeralEvent> {
        self.events.visible()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.state_rx.clone()
    }

    pub fn visual_progress(&self) -> watch::Receiver<VisualProgress> {
        self.progress_rx.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.chat.messages()
    }

    pub fn summary(&self) -> Option<ChatSummary> {
        self.chat.summary()
    }

    pub fn chat(&self) -> &ChatSessionManager {
        &self.chat
    }
}

impl Drop for RefreshCycleController {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Stop(None));
    }
}

/// 状态拥有者
struct CycleOwner {
    service: Arc<dyn ContentService>,
    coordinator: Arc<MediaGenerationCoordinator>,
    chat: ChatSessionManager,
    settings: LiveSection,
    recovery: RecoveryEngine,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<LiveSnapshot>,
    progress_tx: Arc<watch::Sender<VisualProgress>>,
    /// 刷新定时器与聊天摘要，直到 stop 才取消
    session_schedules: PeriodicTaskScheduler,
    /// 依赖当前主题的周期任务，每次结算整组重建
    content_schedules: PeriodicTaskScheduler,
    next_cycle_id: CycleId,
    in_flight: HashSet<CycleId>,
    current: Option<Arc<RefreshCycle>>,
    settlement_seq: u64,
    generation: u64,
    overlay: Option<OverlayState>,
    affirmations: AffirmationRotation,
    stopped: bool,
}

impl CycleOwner {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::RequestRefresh => self.start_cycle(),
                Command::CycleSettled(cycle) => self.settle(*cycle),
                Command::OverlayQuote { generation, text } => self.apply_overlay(generation, text),
                Command::RotateAffirmation { generation } => self.rotate_affirmation(generation),
                Command::Stop(ack) => {
                    self.shutdown();
                    // 关闭通道后排空：已入队的结算也要释放
                    cmd_rx.close();
                    while let Ok(cmd) = cmd_rx.try_recv() {
                        if let Command::CycleSettled(cycle) = cmd {
                            self.in_flight.remove(&cycle.id);
                            cycle.release(self.service.as_ref());
                        }
                    }
                    self.publish();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
        tracing::debug!("Refresh cycle controller loop exited");
    }

    fn arm_session_schedules(&self) {
        let tx = self.cmd_tx.clone();
        self.session_schedules
            .schedule("refresh-cycle", self.settings.cycle_interval(), move || {
                let _ = tx.send(Command::RequestRefresh);
                async {}
            });

        let chat = self.chat.clone();
        self.session_schedules
            .schedule("chat-summary", self.settings.summary_interval(), move || {
                let chat = chat.clone();
                async move {
                    if let Err(e) = chat.summarize().await {
                        RecoveryEngine::new().handle(&e);
                    }
                }
            });
    }

    fn start_cycle(&mut self) {
        if self.stopped {
            return;
        }
        self.next_cycle_id += 1;
        let id = self.next_cycle_id;
        self.in_flight.insert(id);

        let progress = ProgressSink::new(id, self.progress_tx.clone());
        progress.report(0);
        tracing::info!("Starting refresh cycle {} ({} in flight)", id, self.in_flight.len());
        self.publish();

        let service = self.service.clone();
        let coordinator = self.coordinator.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let cycle = run_cycle(id, service.as_ref(), &coordinator, progress).await;
            if let Err(mpsc::error::SendError(Command::CycleSettled(cycle))) =
                cmd_tx.send(Command::CycleSettled(Box::new(cycle)))
            {
                tracing::info!("Cycle {} settled after shutdown, releasing its media", cycle.id);
                cycle.release(service.as_ref());
            }
        });
    }

    fn is_stale(&self, cycle: &RefreshCycle) -> bool {
        match self.settings.settlement_policy {
            SettlementPolicy::LatestSettlement => false,
            SettlementPolicy::LatestStart => {
                self.current.as_ref().is_some_and(|current| current.id > cycle.id)
            }
        }
    }

    fn settle(&mut self, mut cycle: RefreshCycle) {
        self.in_flight.remove(&cycle.id);
        if self.stopped || self.is_stale(&cycle) {
            tracing::info!("Discarding superseded cycle {} ({:?})", cycle.id, cycle.status);
            cycle.release(self.service.as_ref());
            self.publish();
            return;
        }

        self.settlement_seq += 1;
        cycle.settlement_seq = self.settlement_seq;
        let cycle = Arc::new(cycle);
        if let Some(previous) = self.current.replace(cycle.clone()) {
            let released = previous.release(self.service.as_ref());
            tracing::debug!("Released {} media handles of cycle {}", released, previous.id);
        }

        if let Some(err) = cycle.error.as_ref().filter(|e| e.is_fatal_to_cycle()) {
            tracing::warn!("Cycle {} failed: {}", cycle.id, err);
        }
        tracing::info!(
            "Cycle {} settled as {:?} (theme '{}')",
            cycle.id,
            cycle.status,
            cycle.theme
        );

        self.restart_content_schedules(&cycle);
        self.publish();
    }

    /// 整组取消旧主题的周期任务，并为新主题重新挂载
    fn restart_content_schedules(&mut self, cycle: &RefreshCycle) {
        self.content_schedules.cancel_all();
        self.generation += 1;

        let Some(base) = cycle.base.as_ref() else {
            // 没有新主题时不保留旧主题的叠加文字与肯定语
            self.overlay = None;
            self.affirmations = AffirmationRotation::default();
            tracing::debug!("Cycle {} has no content, content schedules stay idle", cycle.id);
            return;
        };
        let ctx = ScheduleContext {
            generation: self.generation,
            cycle: cycle.id,
            theme: base.theme.clone(),
        };
        self.chat.set_context(base.theme.clone());
        self.rotate_overlay(base.overlay_quote.clone());

        // 肯定语先立即展示第一条，再按周期轮播
        self.affirmations = AffirmationRotation::new(base.affirmations.clone());
        if self.affirmations.advance().is_some() {
            let tx = self.cmd_tx.clone();
            let generation = ctx.generation;
            self.content_schedules.schedule(
                "affirmation-rotation",
                self.settings.affirmation_interval(),
                move || {
                    let _ = tx.send(Command::RotateAffirmation { generation });
                    async {}
                },
            );
        }

        let chat = self.chat.clone();
        let host_ctx = ctx.clone();
        self.content_schedules.schedule(
            "host-question",
            self.settings.host_question_interval(),
            move || {
                let chat = chat.clone();
                let ctx = host_ctx.clone();
                async move {
                    match chat.host_interjection(&ctx.theme).await {
                        Ok(Some(message)) => {
                            tracing::debug!("Host question for cycle {}: {}", ctx.cycle, message.text)
                        }
                        Ok(None) => {}
                        Err(e) => {
                            RecoveryEngine::new().handle(&e);
                        }
                    }
                }
            },
        );

        let service = self.service.clone();
        let tx = self.cmd_tx.clone();
        self.content_schedules.schedule(
            "dynamic-overlay",
            self.settings.overlay_interval(),
            move || {
                let service = service.clone();
                let tx = tx.clone();
                let ctx = ctx.clone();
                async move {
                    match service.generate_overlay_quote(&ctx.theme).await {
                        Ok(Some(text)) if !text.trim().is_empty() => {
                            let _ = tx.send(Command::OverlayQuote {
                                generation: ctx.generation,
                                text: text.trim().to_string(),
                            });
                        }
                        Ok(_) => tracing::debug!("Empty overlay quote for cycle {}", ctx.cycle),
                        Err(e) => {
                            RecoveryEngine::new().handle(&LiveError::transient("dynamic-overlay", e));
                        }
                    }
                }
            },
        );

        tracing::info!(
            "Armed {} content schedules for cycle {}",
            self.content_schedules.active_count(),
            cycle.id
        );
    }

    fn rotate_overlay(&mut self, text: String) {
        let next = OverlayState::next(self.overlay.as_ref(), text, &mut rand::rng());
        self.overlay = Some(next);
    }

    fn apply_overlay(&mut self, generation: u64, text: String) {
        if self.stopped || generation != self.generation {
            tracing::debug!("Ignoring overlay quote from schedule generation {}", generation);
            return;
        }
        self.rotate_overlay(text);
        self.publish();
    }

    fn rotate_affirmation(&mut self, generation: u64) {
        if self.stopped || generation != self.generation {
            return;
        }
        self.affirmations.advance();
        self.publish();
    }

    fn shutdown(&mut self) {
        self.stopped = true;
        self.session_schedules.cancel_all();
        self.content_schedules.cancel_all();
        self.chat.shutdown();
        if let Some(current) = &self.current {
            let released = current.release(self.service.as_ref());
            tracing::info!("Released {} media handles of cycle {} on shutdown", released, current.id);
        }
        if !self.in_flight.is_empty() {
            tracing::info!(
                "{} cycles still in flight; their media will be released when they settle",
                self.in_flight.len()
            );
        }
        self.publish();
        tracing::info!("Live session stopped");
    }

    fn publish(&self) {
        let error_message = self
            .current
            .as_ref()
            .and_then(|c| c.error.as_ref())
            .and_then(|e| self.recovery.user_message(e));
        let snapshot = LiveSnapshot {
            phase: derive_phase(self.stopped, self.in_flight.len(), self.current.as_deref()),
            current: self.current.clone(),
            in_flight: self.in_flight.len(),
            overlay: self.overlay.clone(),
            affirmation: self.affirmations.current().map(str::to_string),
            error_message,
        };
        self.state_tx.send_replace(snapshot);
    }
}

/// 一个完整周期：取基础内容，成功后交给协调器生成媒体
async fn run_cycle(
    id: CycleId,
    service: &dyn ContentService,
    coordinator: &MediaGenerationCoordinator,
    progress: ProgressSink,
) -> RefreshCycle {
    let mut cycle = RefreshCycle::pending(id, Instant::now());
    match service.fetch_base_content().await {
        Ok(base) => {
            cycle.theme = base.theme.clone();
            let outcome = coordinator
                .run(CycleContext {
                    id,
                    base: base.clone(),
                    progress,
                })
                .await;
            cycle.apply(outcome);
            cycle.base = Some(base);
        }
        Err(err) => {
            let err = LiveError::from(err);
            tracing::warn!("Cycle {}: base content unavailable: {}", id, err);
            cycle.fail(err);
        }
    }
    cycle.settled_at = Some(Instant::now());
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LivePhase;
    use crate::service::MockContentService;
    use std::time::Duration;

    async fn settled(rx: &mut watch::Receiver<LiveSnapshot>, count: u64) -> LiveSnapshot {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                let seq = snapshot.current.as_ref().map_or(0, |c| c.settlement_seq);
                if seq >= count && snapshot.in_flight == 0 {
                    return snapshot.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_triggers_next_cycle() {
        let mock = Arc::new(MockContentService::new());
        let controller = RefreshCycleController::start(mock.clone(), &AppConfig::default()).unwrap();
        let mut rx = controller.subscribe();

        settled(&mut rx, 1).await;
        assert_eq!(mock.base_calls(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        let snapshot = settled(&mut rx, 2).await;
        assert_eq!(mock.base_calls(), 2);
        assert_eq!(snapshot.current.unwrap().id, 2);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_media_released_on_replacement() {
        let mock = Arc::new(MockContentService::new());
        let controller = RefreshCycleController::start(mock.clone(), &AppConfig::default()).unwrap();
        let mut rx = controller.subscribe();

        let first = settled(&mut rx, 1).await.current.unwrap();
        controller.request_refresh().unwrap();
        let second = settled(&mut rx, 2).await.current.unwrap();

        assert!(first.visual.as_ref().unwrap().is_released());
        assert!(first.audio.as_ref().unwrap().is_released());
        assert!(!second.visual.as_ref().unwrap().is_released());
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_and_rejects_commands() {
        let mock = Arc::new(MockContentService::new());
        let controller = RefreshCycleController::start(mock.clone(), &AppConfig::default()).unwrap();
        let mut rx = controller.subscribe();
        let current = settled(&mut rx, 1).await.current.unwrap();

        controller.stop().await;
        controller.stop().await;

        assert!(current.visual.as_ref().unwrap().is_released());
        assert_eq!(controller.snapshot().phase, LivePhase::Stopped);
        assert!(controller.is_stopped());
        assert_eq!(controller.request_refresh(), Err(LiveError::Stopped));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(mock.base_calls(), 1);
        assert_eq!(mock.summarize_calls(), 0);
    }
}
