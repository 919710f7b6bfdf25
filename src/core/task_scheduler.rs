//! 周期任务调度：固定周期回调、单个取消与整组取消、轮换选择
//!
//! 每个条目在调度后一个周期触发第一次；错过的 tick 直接跳过，不补发。
//! 条目的取消令牌都挂在当前组令牌下，cancel_all 一次性取消整组并换上新的组令牌。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 调度条目句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ScheduleHandle(u64);

static NEXT_SCHEDULE_ID: AtomicU64 = AtomicU64::new(0);

impl ScheduleHandle {
    fn next() -> Self {
        Self(NEXT_SCHEDULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct ScheduleEntry {
    id: String,
    token: CancellationToken,
}

/// 周期任务调度器
pub struct PeriodicTaskScheduler {
    /// 组令牌，cancel_all 时整体取消并替换
    group: Mutex<CancellationToken>,
    entries: Mutex<HashMap<ScheduleHandle, ScheduleEntry>>,
}

impl PeriodicTaskScheduler {
    pub fn new() -> Self {
        Self {
            group: Mutex::new(CancellationToken::new()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 注册周期回调；必须在 tokio 运行时内调用
    pub fn schedule<F, Fut>(&self, id: impl Into<String>, period: Duration, mut callback: F) -> ScheduleHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let period = period.max(Duration::from_millis(1));
        let handle = ScheduleHandle::next();
        let token = self
            .group
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();

        let task_token = token.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        tracing::trace!("Periodic task '{}' tick", task_id);
                        tokio::select! {
                            biased;
                            _ = task_token.cancelled() => break,
                            _ = callback() => {}
                        }
                    }
                }
            }
            tracing::debug!("Periodic task '{}' stopped", task_id);
        });

        tracing::debug!("Scheduled periodic task '{}' every {:?}", id, period);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, ScheduleEntry { id, token });
        handle
    }

    /// 取消单个条目；句柄不存在时返回 false
    pub fn cancel(&self, handle: ScheduleHandle) -> bool {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!("Cancelled periodic task '{}'", entry.id);
                true
            }
            None => false,
        }
    }

    /// 整组取消，之后的 schedule 挂到新的组令牌下
    pub fn cancel_all(&self) {
        let mut group = self.group.lock().unwrap_or_else(PoisonError::into_inner);
        group.cancel();
        *group = CancellationToken::new();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.is_empty() {
            tracing::debug!("Cancelled {} periodic tasks", entries.len());
        }
        entries.clear();
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = entries.values().map(|e| e.id.clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for PeriodicTaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeriodicTaskScheduler {
    fn drop(&mut self) {
        self.group
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// 轮换选择：在排除上一次取值后的候选中均匀随机；排除后为空则退回全集
pub fn pick_excluding<T, R>(candidates: &[T], previous: Option<&T>, rng: &mut R) -> Option<T>
where
    T: PartialEq + Clone,
    R: Rng + ?Sized,
{
    let filtered: Vec<&T> = candidates.iter().filter(|c| Some(*c) != previous).collect();
    let pool: Vec<&T> = if filtered.is_empty() {
        candidates.iter().collect()
    } else {
        filtered
    };
    pool.choose(rng).map(|c| (*c).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter_task(
        scheduler: &PeriodicTaskScheduler,
        id: &str,
        period: Duration,
    ) -> (ScheduleHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = scheduler.schedule(id, period, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (handle, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let scheduler = PeriodicTaskScheduler::new();
        let (_, count) = counter_task(&scheduler, "tick", Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single_entry() {
        let scheduler = PeriodicTaskScheduler::new();
        let (a, count_a) = counter_task(&scheduler, "a", Duration::from_secs(5));
        let (_, count_b) = counter_task(&scheduler, "b", Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(scheduler.cancel(a));
        assert!(!scheduler.cancel(a));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active_ids(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_group_and_allows_rescheduling() {
        let scheduler = PeriodicTaskScheduler::new();
        let (_, old_a) = counter_task(&scheduler, "old-a", Duration::from_secs(3));
        let (_, old_b) = counter_task(&scheduler, "old-b", Duration::from_secs(4));

        scheduler.cancel_all();
        assert_eq!(scheduler.active_count(), 0);

        let (_, fresh) = counter_task(&scheduler, "fresh", Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(12_100)).await;

        assert_eq!(old_a.load(Ordering::SeqCst), 0);
        assert_eq!(old_b.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_pick_excluding_never_repeats() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = ["a", "b", "c"];
        let mut previous = None;
        for _ in 0..200 {
            let next = pick_excluding(&candidates, previous.as_ref(), &mut rng).unwrap();
            assert_ne!(Some(next), previous);
            previous = Some(next);
        }
    }

    #[test]
    fn test_pick_excluding_two_candidates_alternates() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = [1, 2];
        assert_eq!(pick_excluding(&candidates, Some(&1), &mut rng), Some(2));
        assert_eq!(pick_excluding(&candidates, Some(&2), &mut rng), Some(1));
    }

    #[test]
    fn test_pick_excluding_falls_back_to_full_set() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pick_excluding(&["only"], Some(&"only"), &mut rng), Some("only"));
        let empty: [u8; 0] = [];
        assert_eq!(pick_excluding(&empty, None, &mut rng), None);
    }
}
