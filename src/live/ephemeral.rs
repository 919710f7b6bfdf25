//! 短时事件注册表：意念文字与光球
//!
//! 每个事件在创建时确定 TTL；是否可见只取决于经过的时间（elapsed <= ttl），没有后台清扫。
//! 光球的 TTL 必须不小于其随机动画时长的上限，否则动画会在播放途中消失。

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::core::LiveError;

pub const INTENTION_TTL: Duration = Duration::from_secs(15);
pub const LIGHT_ORB_TTL: Duration = Duration::from_secs(13);
pub const ORB_MIN_ANIMATION: Duration = Duration::from_secs(8);
pub const ORB_MAX_ANIMATION: Duration = Duration::from_secs(13);

/// 事件 ID
pub type EventId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    IntentionText,
    LightOrb,
}

/// 光球的随机外观参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrbStyle {
    pub hue_degrees: u16,
    pub size_px: u16,
    pub drift_x: i16,
    pub animation: Duration,
}

impl OrbStyle {
    /// 随机外观，动画时长落在 [ORB_MIN_ANIMATION, max_animation]
    pub fn random<R: Rng + ?Sized>(rng: &mut R, max_animation: Duration) -> Self {
        let max_ms = max_animation.as_millis() as u64;
        let min_ms = (ORB_MIN_ANIMATION.as_millis() as u64).min(max_ms);
        Self {
            hue_degrees: rng.random_range(0..360),
            size_px: rng.random_range(24..=72),
            drift_x: rng.random_range(-120..=120),
            animation: Duration::from_millis(rng.random_range(min_ms..=max_ms)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EventPayload {
    Text(String),
    Orb(OrbStyle),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Text(_) => EventKind::IntentionText,
            EventPayload::Orb(_) => EventKind::LightOrb,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EphemeralEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub payload: EventPayload,
    #[serde(skip)]
    pub created_at: Instant,
    pub ttl: Duration,
}

impl EphemeralEvent {
    pub fn is_visible_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) <= self.ttl
    }
}

/// 各类事件的 TTL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventTtls {
    pub intention: Duration,
    pub light_orb: Duration,
    pub orb_max_animation: Duration,
}

impl Default for EventTtls {
    fn default() -> Self {
        Self {
            intention: INTENTION_TTL,
            light_orb: LIGHT_ORB_TTL,
            orb_max_animation: ORB_MAX_ANIMATION,
        }
    }
}

impl EventTtls {
    /// 光球 TTL 必须覆盖最长动画
    pub fn validate(&self) -> Result<(), LiveError> {
        if self.intention.is_zero() {
            return Err(LiveError::Config("intention ttl must be positive".to_string()));
        }
        if self.light_orb < self.orb_max_animation {
            return Err(LiveError::Config(format!(
                "light orb ttl {:?} is shorter than the longest orb animation {:?}",
                self.light_orb, self.orb_max_animation
            )));
        }
        Ok(())
    }

    pub fn ttl_for(&self, kind: EventKind) -> Duration {
        match kind {
            EventKind::IntentionText => self.intention,
            EventKind::LightOrb => self.light_orb,
        }
    }
}

/// 短时事件注册表；add 与查询可并发进行
#[derive(Debug)]
pub struct EphemeralEventRegistry {
    ttls: EventTtls,
    events: RwLock<HashMap<EventId, EphemeralEvent>>,
}

impl EphemeralEventRegistry {
    pub fn new(ttls: EventTtls) -> Result<Self, LiveError> {
        ttls.validate()?;
        Ok(Self {
            ttls,
            events: RwLock::new(HashMap::new()),
        })
    }

    pub fn ttls(&self) -> EventTtls {
        self.ttls
    }

    pub fn add(&self, payload: EventPayload) -> EventId {
        self.add_at(payload, Instant::now())
    }

    /// 以指定时间为创建时间添加事件；顺带丢弃已过期的条目
    pub fn add_at(&self, payload: EventPayload, now: Instant) -> EventId {
        let kind = payload.kind();
        let event = EphemeralEvent {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            kind,
            payload,
            created_at: now,
            ttl: self.ttls.ttl_for(kind),
        };
        let id = event.id.clone();
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.retain(|_, e| e.is_visible_at(now));
        events.insert(id.clone(), event);
        id
    }

    /// 添加意念文字；空白文本不添加
    pub fn add_intention(&self, text: &str) -> Option<EventId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(self.add(EventPayload::Text(text.to_string())))
    }

    /// 发出一个随机外观的光球
    pub fn send_light(&self) -> EventId {
        let style = OrbStyle::random(&mut rand::rng(), self.ttls.orb_max_animation);
        self.add(EventPayload::Orb(style))
    }

    pub fn get(&self, id: &str) -> Option<EphemeralEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn is_visible(&self, id: &str, now: Instant) -> bool {
        self.get(id).is_some_and(|e| e.is_visible_at(now))
    }

    /// 指定时刻可见的事件，按创建时间排序
    pub fn visible_at(&self, now: Instant) -> Vec<EphemeralEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let mut visible: Vec<EphemeralEvent> = events
            .values()
            .filter(|e| e.is_visible_at(now))
            .cloned()
            .collect();
        visible.sort_by_key(|e| e.created_at);
        visible
    }

    pub fn visible(&self) -> Vec<EphemeralEvent> {
        self.visible_at(Instant::now())
    }

    /// 删除已过期事件，返回删除条数
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let before = events.len();
        events.retain(|_, e| e.is_visible_at(now));
        before - events.len()
    }

    /// 当前保存的条目数（含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn registry() -> EphemeralEventRegistry {
        EphemeralEventRegistry::new(EventTtls::default()).unwrap()
    }

    #[test]
    fn test_intention_visible_until_ttl() {
        let registry = registry();
        let t0 = Instant::now();
        let id = registry.add_at(EventPayload::Text("peace".into()), t0);

        assert!(registry.is_visible(&id, t0));
        assert!(registry.is_visible(&id, t0 + Duration::from_millis(14_900)));
        assert!(registry.is_visible(&id, t0 + INTENTION_TTL));
        assert!(!registry.is_visible(&id, t0 + Duration::from_millis(15_100)));
    }

    #[test]
    fn test_orb_ttl_covers_longest_animation() {
        let ttls = EventTtls::default();
        assert!(ttls.validate().is_ok());
        assert!(ttls.light_orb >= ORB_MAX_ANIMATION);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let style = OrbStyle::random(&mut rng, ttls.orb_max_animation);
            assert!(style.animation <= ttls.light_orb);
            assert!(style.animation >= ORB_MIN_ANIMATION);
        }
    }

    #[test]
    fn test_short_orb_ttl_is_rejected() {
        let ttls = EventTtls {
            light_orb: Duration::from_secs(10),
            ..EventTtls::default()
        };
        assert!(matches!(
            EphemeralEventRegistry::new(ttls),
            Err(LiveError::Config(_))
        ));
    }

    #[test]
    fn test_expiry_is_independent_per_event() {
        let registry = registry();
        let t0 = Instant::now();
        let orb = registry.add_at(EventPayload::Orb(OrbStyle::random(&mut rand::rng(), ORB_MAX_ANIMATION)), t0);
        let word = registry.add_at(EventPayload::Text("hope".into()), t0 + Duration::from_secs(5));

        let at_14 = registry.visible_at(t0 + Duration::from_secs(14));
        assert_eq!(at_14.len(), 1);
        assert_eq!(at_14[0].id, word);
        assert!(!registry.is_visible(&orb, t0 + Duration::from_secs(14)));

        assert_eq!(registry.purge_expired(t0 + Duration::from_secs(14)), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.purge_expired(t0 + Duration::from_secs(21)), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_blank_intention_is_ignored() {
        let registry = registry();
        assert!(registry.add_intention("   ").is_none());
        assert!(registry.add_intention(" joy ").is_some());
        match &registry.visible()[0].payload {
            EventPayload::Text(text) => assert_eq!(text, "joy"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_expire_with_simulated_time() {
        let registry = registry();
        registry.add_intention("calm").unwrap();
        registry.send_light();
        assert_eq!(registry.visible().len(), 2);

        tokio::time::sleep(Duration::from_millis(13_100)).await;
        let visible = registry.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].kind, EventKind::IntentionText);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.visible().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    registry.add_intention(&format!("word {}-{}", i, j));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.visible().len(), 200);
    }
}
