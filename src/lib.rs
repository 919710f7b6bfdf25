//! Lumina - 自刷新直播会话编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态投影、周期任务调度、优雅关闭
//! - **live**: 刷新周期控制器、媒体生成协调、短时事件、聊天会话、叠加文字
//! - **observability**: 日志初始化
//! - **service**: 内容生成服务抽象与实现（超时装饰器 / Mock）

pub mod config;
pub mod core;
pub mod live;
pub mod observability;
pub mod service;

pub use live::RefreshCycleController;
