//! 内容生成服务抽象
//!
//! 所有后端（真实生成服务 / Mock）实现 ContentService：基础内容、画面、音频与若干短文本生成。
//! 每个方法都是独立可失败的挂起点，失败统一表达为 ServiceError。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::live::ChatMessage;

/// 服务调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// 每个周期的基础内容：主题、叠加语录、音频提示词、肯定语与热门话题
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseContent {
    pub theme: String,
    pub overlay_quote: String,
    pub audio_prompt: String,
    pub affirmations: Vec<String>,
    pub trending_topics: Vec<String>,
}

impl BaseContent {
    /// 画面生成提示词：主题 + 语录
    pub fn visual_prompt(&self) -> String {
        if self.overlay_quote.is_empty() {
            self.theme.clone()
        } else {
            format!("{}, evoking \"{}\"", self.theme, self.overlay_quote)
        }
    }
}

/// 媒体种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Visual,
    Audio,
}

#[derive(Debug)]
struct MediaResource {
    id: String,
    kind: MediaKind,
    uri: String,
    released: AtomicBool,
}

/// 可释放的媒体句柄；克隆共享同一资源，释放状态全局唯一
#[derive(Clone, Debug)]
pub struct MediaHandle {
    inner: Arc<MediaResource>,
}

impl MediaHandle {
    pub fn new(kind: MediaKind, uri: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MediaResource {
                id: format!("media_{}", uuid::Uuid::new_v4()),
                kind,
                uri: uri.into(),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// 标记为已释放；仅第一次调用返回 true
    fn mark_released(&self) -> bool {
        !self.inner.released.swap(true, Ordering::AcqRel)
    }
}

impl PartialEq for MediaHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaHandle {}

impl Serialize for MediaHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            id: &'a str,
            kind: MediaKind,
            uri: &'a str,
            released: bool,
        }
        View {
            id: self.id(),
            kind: self.kind(),
            uri: self.uri(),
            released: self.is_released(),
        }
        .serialize(serializer)
    }
}

/// 释放媒体句柄（幂等）：重复释放或句柄不存在均为 no-op，返回是否真正执行了释放
pub fn release_media(service: &dyn ContentService, handle: Option<&MediaHandle>) -> bool {
    match handle {
        Some(h) if h.mark_released() => {
            tracing::debug!("Releasing {:?} media {}", h.kind(), h.id());
            service.release_media(h);
            true
        }
        _ => false,
    }
}

/// 内容生成服务 trait
#[async_trait]
pub trait ContentService: Send + Sync {
    async fn fetch_base_content(&self) -> Result<BaseContent, ServiceError>;

    /// 画面生成；on_progress 接收 0..=100 的进度（不保证严格递增）
    async fn generate_visual(
        &self,
        prompt: &str,
        theme: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<MediaHandle, ServiceError>;

    async fn generate_audio(&self, prompt: &str, theme: &str) -> Result<MediaHandle, ServiceError>;

    async fn generate_chat_reply(
        &self,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<Option<String>, ServiceError>;

    async fn generate_host_question(&self, theme: &str) -> Result<Option<String>, ServiceError>;

    async fn generate_overlay_quote(&self, theme: &str) -> Result<Option<String>, ServiceError>;

    async fn summarize(&self, history: &[ChatMessage]) -> Result<Option<String>, ServiceError>;

    /// 销毁底层媒体资源；由 release_media 保证每个句柄至多调用一次
    fn release_media(&self, _handle: &MediaHandle) {}
}
