//! Mock 内容生成服务（用于测试与演示，无需真实后端）
//!
//! 每类调用都有一个脚本队列；队列为空时返回确定性的默认内容。
//! 记录调用次数、摘要输入长度与已释放的媒体 ID，便于断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{BaseContent, ContentService, MediaHandle, MediaKind, ServiceError};
use crate::live::ChatMessage;

struct Scripted<T> {
    delay: Option<Duration>,
    result: Result<T, ServiceError>,
}

type TextQueue = Mutex<VecDeque<Result<Option<String>, ServiceError>>>;

#[derive(Default)]
struct CallCounters {
    base: AtomicUsize,
    visual: AtomicUsize,
    audio: AtomicUsize,
    chat: AtomicUsize,
    host: AtomicUsize,
    overlay: AtomicUsize,
    summarize: AtomicUsize,
}

/// 可编排的 Mock 服务
pub struct MockContentService {
    latency: Duration,
    progress_steps: Vec<u8>,
    base: Mutex<VecDeque<Scripted<BaseContent>>>,
    visual: Mutex<VecDeque<Scripted<()>>>,
    audio: Mutex<VecDeque<Scripted<()>>>,
    chat_replies: TextQueue,
    host_questions: TextQueue,
    overlay_quotes: TextQueue,
    summaries: TextQueue,
    calls: CallCounters,
    summary_inputs: Mutex<Vec<usize>>,
    released: Mutex<Vec<String>>,
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(item);
}

/// 第 n 次基础内容的默认值
pub fn sample_base_content(n: usize) -> BaseContent {
    let themes = ["Aurora drift", "Ocean dawn", "Forest rain", "Desert stars"];
    let theme = themes[n % themes.len()].to_string();
    BaseContent {
        overlay_quote: format!("Let {} carry you", theme.to_lowercase()),
        audio_prompt: format!("ambient soundscape, {}", theme.to_lowercase()),
        affirmations: vec![
            "I am calm".to_string(),
            "I am present".to_string(),
            "I am enough".to_string(),
        ],
        trending_topics: vec!["mindfulness".to_string(), "slow living".to_string()],
        theme,
    }
}

impl MockContentService {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            progress_steps: vec![10, 35, 60, 85, 100],
            base: Mutex::new(VecDeque::new()),
            visual: Mutex::new(VecDeque::new()),
            audio: Mutex::new(VecDeque::new()),
            chat_replies: Mutex::new(VecDeque::new()),
            host_questions: Mutex::new(VecDeque::new()),
            overlay_quotes: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            calls: CallCounters::default(),
            summary_inputs: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    /// 所有未单独设置延迟的调用的统一延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_progress_steps(mut self, steps: Vec<u8>) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn push_base(&self, result: Result<BaseContent, ServiceError>) {
        push(&self.base, Scripted { delay: None, result });
    }

    pub fn push_visual(&self, delay: Duration, result: Result<(), ServiceError>) {
        push(&self.visual, Scripted { delay: Some(delay), result });
    }

    pub fn push_audio(&self, delay: Duration, result: Result<(), ServiceError>) {
        push(&self.audio, Scripted { delay: Some(delay), result });
    }

    pub fn push_chat_reply(&self, result: Result<Option<String>, ServiceError>) {
        push(&self.chat_replies, result);
    }

    pub fn push_host_question(&self, result: Result<Option<String>, ServiceError>) {
        push(&self.host_questions, result);
    }

    pub fn push_overlay_quote(&self, result: Result<Option<String>, ServiceError>) {
        push(&self.overlay_quotes, result);
    }

    pub fn push_summary(&self, result: Result<Option<String>, ServiceError>) {
        push(&self.summaries, result);
    }

    pub fn base_calls(&self) -> usize {
        self.calls.base.load(Ordering::SeqCst)
    }

    pub fn visual_calls(&self) -> usize {
        self.calls.visual.load(Ordering::SeqCst)
    }

    pub fn audio_calls(&self) -> usize {
        self.calls.audio.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.calls.chat.load(Ordering::SeqCst)
    }

    pub fn host_calls(&self) -> usize {
        self.calls.host.load(Ordering::SeqCst)
    }

    pub fn overlay_calls(&self) -> usize {
        self.calls.overlay.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.calls.summarize.load(Ordering::SeqCst)
    }

    /// 每次 summarize 收到的消息条数
    pub fn summary_inputs(&self) -> Vec<usize> {
        self.summary_inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn released_ids(&self) -> Vec<String> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn wait(&self, delay: Option<Duration>) {
        let delay = delay.unwrap_or(self.latency);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn text(
        &self,
        queue: &TextQueue,
        fallback: impl FnOnce() -> Option<String>,
    ) -> Result<Option<String>, ServiceError> {
        self.wait(None).await;
        pop(queue).unwrap_or_else(|| Ok(fallback()))
    }
}

impl Default for MockContentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentService for MockContentService {
    async fn fetch_base_content(&self) -> Result<BaseContent, ServiceError> {
        let n = self.calls.base.fetch_add(1, Ordering::SeqCst);
        match pop(&self.base) {
            Some(scripted) => {
                self.wait(scripted.delay).await;
                scripted.result
            }
            None => {
                self.wait(None).await;
                Ok(sample_base_content(n))
            }
        }
    }

    async fn generate_visual(
        &self,
        _prompt: &str,
        theme: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<MediaHandle, ServiceError> {
        let n = self.calls.visual.fetch_add(1, Ordering::SeqCst);
        let scripted = pop(&self.visual).unwrap_or(Scripted { delay: None, result: Ok(()) });
        let delay = scripted.delay.unwrap_or(self.latency);

        let steps = self.progress_steps.len().max(1) as u32;
        for step in &self.progress_steps {
            if !delay.is_zero() {
                tokio::time::sleep(delay / steps).await;
            }
            if scripted.result.is_err() && *step >= 100 {
                break;
            }
            on_progress(*step);
        }
        if self.progress_steps.is_empty() {
            self.wait(Some(delay)).await;
        }

        scripted
            .result
            .map(|()| MediaHandle::new(MediaKind::Visual, format!("blob:visual/{}/{}", theme, n)))
    }

    async fn generate_audio(&self, _prompt: &str, theme: &str) -> Result<MediaHandle, ServiceError> {
        let n = self.calls.audio.fetch_add(1, Ordering::SeqCst);
        let scripted = pop(&self.audio).unwrap_or(Scripted { delay: None, result: Ok(()) });
        self.wait(scripted.delay).await;
        scripted
            .result
            .map(|()| MediaHandle::new(MediaKind::Audio, format!("blob:audio/{}/{}", theme, n)))
    }

    async fn generate_chat_reply(
        &self,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<Option<String>, ServiceError> {
        self.calls.chat.fetch_add(1, Ordering::SeqCst);
        let last = history.last().map(|m| m.text.clone()).unwrap_or_default();
        self.text(&self.chat_replies, || {
            Some(format!("[{}] I hear you: {}", context, last))
        })
        .await
    }

    async fn generate_host_question(&self, theme: &str) -> Result<Option<String>, ServiceError> {
        self.calls.host.fetch_add(1, Ordering::SeqCst);
        self.text(&self.host_questions, || {
            Some(format!("What does {} stir in you right now?", theme.to_lowercase()))
        })
        .await
    }

    async fn generate_overlay_quote(&self, theme: &str) -> Result<Option<String>, ServiceError> {
        let n = self.calls.overlay.fetch_add(1, Ordering::SeqCst);
        self.text(&self.overlay_quotes, || Some(format!("{} #{}", theme, n + 1)))
            .await
    }

    async fn summarize(&self, history: &[ChatMessage]) -> Result<Option<String>, ServiceError> {
        self.calls.summarize.fetch_add(1, Ordering::SeqCst);
        self.summary_inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history.len());
        let count = history.len();
        self.text(&self.summaries, || {
            Some(format!("The room shared {} thoughts.", count))
        })
        .await
    }

    fn release_media(&self, handle: &MediaHandle) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.id().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_results_are_consumed_in_order() {
        let mock = MockContentService::new();
        mock.push_base(Err(ServiceError::QuotaExceeded));
        assert_eq!(
            mock.fetch_base_content().await.unwrap_err(),
            ServiceError::QuotaExceeded
        );
        assert!(mock.fetch_base_content().await.is_ok());
        assert_eq!(mock.base_calls(), 2);
    }

    #[tokio::test]
    async fn test_visual_reports_progress() {
        let mock = MockContentService::new();
        let seen = Mutex::new(Vec::new());
        let handle = mock
            .generate_visual("p", "t", &|p| seen.lock().unwrap().push(p))
            .await
            .unwrap();
        assert_eq!(handle.kind(), MediaKind::Visual);
        assert_eq!(seen.into_inner().unwrap(), vec![10, 35, 60, 85, 100]);
    }
}
