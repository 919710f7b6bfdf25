//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LUMINA__*` 覆盖（双下划线表示嵌套，如 `LUMINA__LIVE__CYCLE_INTERVAL_SECS=120`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::LiveError;
use crate::live::{ChatSettings, EventTtls};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub live: LiveSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub service: ServiceSection,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), LiveError> {
        self.live.validate()?;
        self.events.ttls().validate()
    }
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 快照日志间隔（秒），仅用于二进制演示
    #[serde(default = "default_snapshot_log_secs")]
    pub snapshot_log_secs: u64,
    /// 运行时长（秒），到期自动关闭；不设置则一直运行到收到信号
    pub run_secs: Option<u64>,
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,
}

fn default_snapshot_log_secs() -> u64 {
    30
}

fn default_cleanup_timeout_secs() -> u64 {
    5
}

impl AppSection {
    pub fn run_for(&self) -> Option<Duration> {
        self.run_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs.max(1))
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            snapshot_log_secs: default_snapshot_log_secs(),
            run_secs: None,
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
        }
    }
}

/// 多个周期同时结算时谁成为当前周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementPolicy {
    /// 最后结算的周期胜出
    #[default]
    LatestSettlement,
    /// 只接受比当前周期更晚启动的周期
    LatestStart,
}

/// [live] 段：刷新周期与各周期任务的节奏
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSection {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_host_question_secs")]
    pub host_question_secs: u64,
    #[serde(default = "default_overlay_secs")]
    pub overlay_secs: u64,
    #[serde(default = "default_affirmation_secs")]
    pub affirmation_secs: u64,
    #[serde(default = "default_summary_secs")]
    pub summary_secs: u64,
    #[serde(default = "default_summary_min_messages")]
    pub summary_min_messages: usize,
    #[serde(default = "default_summary_window")]
    pub summary_window: usize,
    #[serde(default = "default_reply_history")]
    pub reply_history: usize,
    #[serde(default)]
    pub settlement_policy: SettlementPolicy,
}

fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_host_question_secs() -> u64 {
    75
}

fn default_overlay_secs() -> u64 {
    60
}

fn default_affirmation_secs() -> u64 {
    9
}

fn default_summary_secs() -> u64 {
    45
}

fn default_summary_min_messages() -> usize {
    3
}

fn default_summary_window() -> usize {
    10
}

fn default_reply_history() -> usize {
    20
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            host_question_secs: default_host_question_secs(),
            overlay_secs: default_overlay_secs(),
            affirmation_secs: default_affirmation_secs(),
            summary_secs: default_summary_secs(),
            summary_min_messages: default_summary_min_messages(),
            summary_window: default_summary_window(),
            reply_history: default_reply_history(),
            settlement_policy: SettlementPolicy::default(),
        }
    }
}

impl LiveSection {
    pub fn validate(&self) -> Result<(), LiveError> {
        let periods = [
            ("cycle_interval_secs", self.cycle_interval_secs),
            ("host_question_secs", self.host_question_secs),
            ("overlay_secs", self.overlay_secs),
            ("affirmation_secs", self.affirmation_secs),
            ("summary_secs", self.summary_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, secs)| *secs == 0) {
            return Err(LiveError::Config(format!("live.{} must be positive", name)));
        }
        if self.summary_window == 0 {
            return Err(LiveError::Config("live.summary_window must be positive".to_string()));
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn host_question_interval(&self) -> Duration {
        Duration::from_secs(self.host_question_secs)
    }

    pub fn overlay_interval(&self) -> Duration {
        Duration::from_secs(self.overlay_secs)
    }

    pub fn affirmation_interval(&self) -> Duration {
        Duration::from_secs(self.affirmation_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_secs)
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            summary_min_messages: self.summary_min_messages,
            summary_window: self.summary_window,
            reply_history: self.reply_history,
        }
    }
}

/// [events] 段：短时事件 TTL（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_intention_ttl_ms")]
    pub intention_ttl_ms: u64,
    #[serde(default = "default_light_orb_ttl_ms")]
    pub light_orb_ttl_ms: u64,
    /// 光球随机动画时长上限，光球 TTL 不得小于该值
    #[serde(default = "default_orb_max_animation_ms")]
    pub orb_max_animation_ms: u64,
}

fn default_intention_ttl_ms() -> u64 {
    15_000
}

fn default_light_orb_ttl_ms() -> u64 {
    13_000
}

fn default_orb_max_animation_ms() -> u64 {
    13_000
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            intention_ttl_ms: default_intention_ttl_ms(),
            light_orb_ttl_ms: default_light_orb_ttl_ms(),
            orb_max_animation_ms: default_orb_max_animation_ms(),
        }
    }
}

impl EventsSection {
    pub fn ttls(&self) -> EventTtls {
        EventTtls {
            intention: Duration::from_millis(self.intention_ttl_ms),
            light_orb: Duration::from_millis(self.light_orb_ttl_ms),
            orb_max_animation: Duration::from_millis(self.orb_max_animation_ms),
        }
    }
}

/// [service] 段：内容生成服务超时
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    /// 文本类调用超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 画面/音频生成超时（秒），生成可能持续数分钟
    #[serde(default = "default_media_timeout_secs")]
    pub media_timeout_secs: u64,
    /// Mock 服务的模拟延迟（毫秒）
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_media_timeout_secs() -> u64 {
    600
}

fn default_mock_latency_ms() -> u64 {
    1_500
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            media_timeout_secs: default_media_timeout_secs(),
            mock_latency_ms: default_mock_latency_ms(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LUMINA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LUMINA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LUMINA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_live_cadences() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.live.cycle_interval(), Duration::from_secs(300));
        assert_eq!(cfg.live.host_question_interval(), Duration::from_secs(75));
        assert_eq!(cfg.live.overlay_interval(), Duration::from_secs(60));
        assert_eq!(cfg.live.affirmation_interval(), Duration::from_secs(9));
        assert_eq!(cfg.live.summary_interval(), Duration::from_secs(45));
        assert_eq!(cfg.live.settlement_policy, SettlementPolicy::LatestSettlement);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.app.run_for(), None);
        assert_eq!(cfg.app.cleanup_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[live]\ncycle_interval_secs = 120\nsettlement_policy = \"latest-start\"\n\n[events]\nlight_orb_ttl_ms = 14000"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.live.cycle_interval_secs, 120);
        assert_eq!(cfg.live.overlay_secs, 60);
        assert_eq!(cfg.live.settlement_policy, SettlementPolicy::LatestStart);
        assert_eq!(cfg.events.ttls().light_orb, Duration::from_secs(14));
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.live.overlay_secs = 0;
        assert!(matches!(cfg.validate(), Err(LiveError::Config(msg)) if msg.contains("overlay")));
    }

    #[test]
    fn test_orb_ttl_shorter_than_animation_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.events.light_orb_ttl_ms = 9_000;
        assert!(cfg.validate().is_err());
    }
}
