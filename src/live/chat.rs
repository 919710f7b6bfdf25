//! 聊天会话：只追加的消息日志 + 异步回复、主持人插话与摘要
//!
//! 序号在日志写锁内分配，因此严格反映真实追加顺序，无论消息来自哪个来源。
//! 回复、插话和摘要都在锁外调用服务，完成后再追加。

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::LiveError;
use crate::service::ContentService;

/// 消息发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    System,
}

/// 单条聊天消息，插入后不再修改
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub seq: u64,
    pub sender: Sender,
    pub text: String,
    /// 追加时间（毫秒时间戳）
    pub created_at: i64,
}

impl ChatMessage {
    pub fn is_system(&self) -> bool {
        matches!(self.sender, Sender::System)
    }
}

/// 聊天摘要；每次整体替换
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatSummary {
    pub text: String,
    pub version: u64,
}

/// 聊天相关参数
#[derive(Clone, Debug)]
pub struct ChatSettings {
    /// 非系统消息数量必须严格大于该值才会生成摘要
    pub summary_min_messages: usize,
    /// 摘要使用的最近消息条数
    pub summary_window: usize,
    /// 生成回复时带上的最近消息条数
    pub reply_history: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            summary_min_messages: 3,
            summary_window: 10,
            reply_history: 20,
        }
    }
}

struct ChatInner {
    service: Arc<dyn ContentService>,
    settings: ChatSettings,
    log: RwLock<Vec<ChatMessage>>,
    summary: RwLock<Option<ChatSummary>>,
    context: RwLock<String>,
    revision: watch::Sender<u64>,
    cancel: CancellationToken,
}

/// 聊天会话管理器；克隆共享同一日志
#[derive(Clone)]
pub struct ChatSessionManager {
    inner: Arc<ChatInner>,
}

impl ChatSessionManager {
    pub fn new(service: Arc<dyn ContentService>, settings: ChatSettings) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ChatInner {
                service,
                settings,
                log: RwLock::new(Vec::new()),
                summary: RwLock::new(None),
                context: RwLock::new(String::new()),
                revision,
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn append(&self, sender: Sender, text: impl Into<String>) -> ChatMessage {
        let mut log = self.inner.log.write().unwrap_or_else(PoisonError::into_inner);
        let message = ChatMessage {
            seq: log.len() as u64 + 1,
            sender,
            text: text.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        log.push(message.clone());
        self.inner.revision.send_replace(message.seq);
        message
    }

    /// 追加用户消息并立即返回；后台请求上下文回复，完成后以 AI 身份追加
    pub fn append_user(&self, text: impl Into<String>) -> ChatMessage {
        let message = self.append(Sender::User, text);
        if self.inner.cancel.is_cancelled() {
            return message;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let history = manager.recent(manager.inner.settings.reply_history, false);
            let context = manager.context();
            let reply = tokio::select! {
                _ = manager.inner.cancel.cancelled() => return,
                reply = manager.inner.service.generate_chat_reply(&history, &context) => reply,
            };
            match reply {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    manager.append(Sender::Ai, text.trim());
                }
                Ok(_) => tracing::debug!("Chat reply was empty"),
                Err(e) => tracing::warn!("Chat reply failed: {}", e),
            }
        });
        message
    }

    pub fn append_system(&self, text: impl Into<String>) -> ChatMessage {
        self.append(Sender::System, text)
    }

    pub fn append_ai(&self, text: impl Into<String>) -> ChatMessage {
        self.append(Sender::Ai, text)
    }

    /// 主持人插话：服务返回问题时以 AI 身份追加
    pub async fn host_interjection(&self, theme: &str) -> Result<Option<ChatMessage>, LiveError> {
        let question = self
            .inner
            .service
            .generate_host_question(theme)
            .await
            .map_err(|e| LiveError::transient("host-question", e))?;
        Ok(question
            .filter(|q| !q.trim().is_empty())
            .map(|q| self.append(Sender::Ai, q.trim())))
    }

    /// 摘要：非系统消息超过阈值时，摘要最近 summary_window 条；每次 tick 都会重新生成
    pub async fn summarize(&self) -> Result<Option<ChatSummary>, LiveError> {
        let settings = &self.inner.settings;
        let recent = {
            let log = self.inner.log.read().unwrap_or_else(PoisonError::into_inner);
            let non_system = log.iter().filter(|m| !m.is_system()).count();
            if non_system <= settings.summary_min_messages {
                return Ok(None);
            }
            Self::tail(&log, settings.summary_window, true)
        };

        let text = self
            .inner
            .service
            .summarize(&recent)
            .await
            .map_err(|e| LiveError::transient("chat-summary", e))?;
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        let mut current = self.inner.summary.write().unwrap_or_else(PoisonError::into_inner);
        let version = current.as_ref().map_or(1, |s| s.version + 1);
        let summary = ChatSummary {
            text: text.trim().to_string(),
            version,
        };
        *current = Some(summary.clone());
        tracing::debug!("Chat summary v{} covers {} messages", version, recent.len());
        Ok(Some(summary))
    }

    fn tail(log: &[ChatMessage], limit: usize, skip_system: bool) -> Vec<ChatMessage> {
        let mut tail: Vec<ChatMessage> = log
            .iter()
            .rev()
            .filter(|m| !(skip_system && m.is_system()))
            .take(limit)
            .cloned()
            .collect();
        tail.reverse();
        tail
    }

    fn recent(&self, limit: usize, skip_system: bool) -> Vec<ChatMessage> {
        let log = self.inner.log.read().unwrap_or_else(PoisonError::into_inner);
        Self::tail(&log, limit, skip_system)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> Option<ChatSummary> {
        self.inner
            .summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 回复时使用的上下文（当前主题）
    pub fn set_context(&self, context: impl Into<String>) {
        *self.inner.context.write().unwrap_or_else(PoisonError::into_inner) = context.into();
    }

    pub fn context(&self) -> String {
        self.inner
            .context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 订阅日志变化（值为最新消息序号）
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// 取消所有进行中的回复，之后的 append_user 不再请求回复
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}
