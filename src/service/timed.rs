//! 超时装饰器：为每个服务调用加上 tokio::time::timeout
//!
//! 文本类调用使用 request 超时，画面/音频使用 media 超时；超时统一转换为 ServiceError::Timeout。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{BaseContent, ContentService, MediaHandle, ServiceError};
use crate::config::ServiceSection;
use crate::live::ChatMessage;

/// 包装任意 ContentService，限制单次调用耗时
pub struct TimedContentService {
    inner: Arc<dyn ContentService>,
    request_timeout: Duration,
    media_timeout: Duration,
}

impl TimedContentService {
    pub fn new(inner: Arc<dyn ContentService>, request_timeout: Duration, media_timeout: Duration) -> Self {
        Self {
            inner,
            request_timeout,
            media_timeout,
        }
    }

    pub fn from_config(inner: Arc<dyn ContentService>, cfg: &ServiceSection) -> Self {
        Self::new(
            inner,
            Duration::from_secs(cfg.request_timeout_secs),
            Duration::from_secs(cfg.media_timeout_secs),
        )
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(limit)),
    }
}

#[async_trait]
impl ContentService for TimedContentService {
    async fn fetch_base_content(&self) -> Result<BaseContent, ServiceError> {
        bounded(self.request_timeout, self.inner.fetch_base_content()).await
    }

    async fn generate_visual(
        &self,
        prompt: &str,
        theme: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<MediaHandle, ServiceError> {
        bounded(
            self.media_timeout,
            self.inner.generate_visual(prompt, theme, on_progress),
        )
        .await
    }

    async fn generate_audio(&self, prompt: &str, theme: &str) -> Result<MediaHandle, ServiceError> {
        bounded(self.media_timeout, self.inner.generate_audio(prompt, theme)).await
    }

    async fn generate_chat_reply(
        &self,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<Option<String>, ServiceError> {
        bounded(
            self.request_timeout,
            self.inner.generate_chat_reply(history, context),
        )
        .await
    }

    async fn generate_host_question(&self, theme: &str) -> Result<Option<String>, ServiceError> {
        bounded(self.request_timeout, self.inner.generate_host_question(theme)).await
    }

    async fn generate_overlay_quote(&self, theme: &str) -> Result<Option<String>, ServiceError> {
        bounded(self.request_timeout, self.inner.generate_overlay_quote(theme)).await
    }

    async fn summarize(&self, history: &[ChatMessage]) -> Result<Option<String>, ServiceError> {
        bounded(self.request_timeout, self.inner.summarize(history)).await
    }

    fn release_media(&self, handle: &MediaHandle) {
        self.inner.release_media(handle);
    }
}
