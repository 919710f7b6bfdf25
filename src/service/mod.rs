//! 内容生成服务层：抽象与实现（超时装饰器 / Mock）

pub mod mock;
pub mod timed;
pub mod traits;

pub use mock::{sample_base_content, MockContentService};
pub use timed::TimedContentService;
pub use traits::{release_media, BaseContent, ContentService, MediaHandle, MediaKind, ServiceError};
