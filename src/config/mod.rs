//! Flare STOMP Core 配置模块
//!
//! - `[stomp]`：身份头、用户目的地前缀、强制下线通知、帧处理开关
//! - `[lifecycle]`：生命周期事件通道容量与 Broker 调用超时
//! - `[logging]`：日志输出配置
//!
//! 加载顺序：显式路径 > `FLARE_STOMP_CONFIG` > `config/stomp.toml`，
//! 再叠加 `config/environments/{FLARE_ENV}.toml`。所有字段均有默认值。

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GatewayError;

mod manager;
pub use manager::ConfigManager;

/// 全局配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<StompCoreConfig> = OnceLock::new();

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/stomp.toml";
/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "FLARE_STOMP_CONFIG";

/// 连接核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StompCoreConfig {
    #[serde(default)]
    pub stomp: StompSettings,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// STOMP 协议相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StompSettings {
    /// CONNECT 帧中携带用户身份的头部名称
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,
    /// 点对点投递的用户目的地前缀
    #[serde(default = "default_user_destination_prefix")]
    pub user_destination_prefix: String,
    /// 系统通知队列
    #[serde(default = "default_notification_destination")]
    pub notification_destination: String,
    /// 发送给被顶下线会话的提示文本
    #[serde(default = "default_eviction_notice")]
    pub eviction_notice: String,
    /// 是否启用帧修复
    #[serde(default = "default_true")]
    pub normalize_frames: bool,
    /// 是否启用帧诊断日志
    #[serde(default)]
    pub inspect_frames: bool,
}

impl Default for StompSettings {
    fn default() -> Self {
        Self {
            user_id_header: default_user_id_header(),
            user_destination_prefix: default_user_destination_prefix(),
            notification_destination: default_notification_destination(),
            eviction_notice: default_eviction_notice(),
            normalize_frames: true,
            inspect_frames: false,
        }
    }
}

/// 生命周期事件处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// 事件通道容量
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// 单次 Broker 调用（通知/关闭）超时（毫秒）
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,
}

impl LifecycleSettings {
    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            broker_timeout_ms: default_broker_timeout_ms(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 未设置时生效）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub with_thread_ids: bool,
    #[serde(default = "default_true")]
    pub with_file: bool,
    #[serde(default = "default_true")]
    pub with_line_number: bool,
    /// JSON 格式输出
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
            json: false,
        }
    }
}

impl StompCoreConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), GatewayError> {
        let invalid = |reason: String| Err(GatewayError::InvalidConfig(reason));
        if self.stomp.user_id_header.trim().is_empty() {
            return invalid("stomp.user_id_header must not be empty".to_string());
        }
        if !self.stomp.user_destination_prefix.starts_with('/') {
            return invalid(format!(
                "stomp.user_destination_prefix must start with '/': {}",
                self.stomp.user_destination_prefix
            ));
        }
        if !self.stomp.notification_destination.starts_with('/') {
            return invalid(format!(
                "stomp.notification_destination must start with '/': {}",
                self.stomp.notification_destination
            ));
        }
        if self.lifecycle.event_channel_capacity == 0 {
            return invalid("lifecycle.event_channel_capacity must be positive".to_string());
        }
        if self.lifecycle.broker_timeout_ms == 0 {
            return invalid("lifecycle.broker_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// 加载配置（只在第一次调用时生效）
pub fn load_config(path: Option<&str>) -> &'static StompCoreConfig {
    APP_CONFIG.get_or_init(|| {
        let path = resolve_config_path(path);
        let mut cfg = match load_config_from_file(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load config, falling back to defaults");
                StompCoreConfig::default()
            }
        };

        if let Err(err) = ConfigManager::load_environment_config(&mut cfg) {
            warn!(error = %err, "failed to load environment config");
        }
        if let Err(err) = cfg.validate() {
            warn!(code = %err.code(), error = %err, "invalid configuration, falling back to defaults");
            cfg = StompCoreConfig::default();
        }
        cfg
    })
}

/// 获取全局配置（未显式加载时按默认路径加载）
pub fn app_config() -> &'static StompCoreConfig {
    match APP_CONFIG.get() {
        Some(cfg) => cfg,
        None => load_config(None),
    }
}

fn resolve_config_path(path: Option<&str>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(p),
        None => env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

/// 从文件加载配置
pub fn load_config_from_file(path: &Path) -> Result<StompCoreConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config format: {}", path.display()))
}

/// 从 TOML 文本解析配置
pub fn parse_config(content: &str) -> Result<StompCoreConfig> {
    let cfg: StompCoreConfig = toml::from_str(content)?;
    Ok(cfg)
}

fn default_user_id_header() -> String {
    "X-User-Id".to_string()
}

fn default_user_destination_prefix() -> String {
    "/user".to_string()
}

fn default_notification_destination() -> String {
    "/queue/notifications".to_string()
}

fn default_eviction_notice() -> String {
    "A previous connection of this account on another device has been closed.".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_broker_timeout_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.stomp.user_id_header, "X-User-Id");
        assert_eq!(cfg.stomp.user_destination_prefix, "/user");
        assert_eq!(cfg.stomp.notification_destination, "/queue/notifications");
        assert!(cfg.stomp.normalize_frames);
        assert!(!cfg.stomp.inspect_frames);
        assert_eq!(cfg.lifecycle.event_channel_capacity, 1024);
        assert_eq!(cfg.lifecycle.broker_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = parse_config(
            r#"
            [stomp]
            user_id_header = "X-Account"
            inspect_frames = true

            [lifecycle]
            broker_timeout_ms = 250

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.stomp.user_id_header, "X-Account");
        assert!(cfg.stomp.inspect_frames);
        assert!(cfg.stomp.normalize_frames);
        assert_eq!(cfg.lifecycle.broker_timeout_ms, 250);
        assert_eq!(cfg.lifecycle.event_channel_capacity, 1024);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(cfg.logging.with_file);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut cfg = StompCoreConfig::default();
        cfg.lifecycle.event_channel_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
        assert!(err.to_string().contains("event_channel_capacity"));

        let mut cfg = StompCoreConfig::default();
        cfg.stomp.user_destination_prefix = "user".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = StompCoreConfig::default();
        cfg.stomp.user_id_header = " ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config_from_file(Path::new("/nonexistent/stomp.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/stomp.toml"));
    }
}
