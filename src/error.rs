//! Flare STOMP Core 错误模块
//!
//! - `GatewayError`：连接核心对外暴露的统一错误类型
//! - `BrokerError`：外部消息代理（Broker）调用失败
//!
//! 注意：会话未知、身份缺失等"预期内"的竞态情况不会以错误形式出现，
//! 它们统一表现为空结果（`None` / 空集合 / 0）。

use std::fmt;

/// 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 外部 Broker 不可用或调用失败
    BrokerUnavailable,
    /// 目标连接不存在或已关闭
    ConnectionClosed,
    /// 生命周期事件分发器已停止
    DispatcherStopped,
    /// 帧处理失败
    FrameRejected,
    /// 配置错误
    InvalidConfig,
    /// 内部错误
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerUnavailable => "BROKER_UNAVAILABLE",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::DispatcherStopped => "DISPATCHER_STOPPED",
            Self::FrameRejected => "FRAME_REJECTED",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker 调用错误
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// 会话对应的出站通道已关闭
    #[error("session {0} is not reachable")]
    SessionUnreachable(String),
    /// 用户当前没有任何可投递的会话
    #[error("user {0} has no live session")]
    UserOffline(String),
    /// 调用超时
    #[error("broker call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 连接核心统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("broker call failed: {0}")]
    Broker(#[from] BrokerError),
    #[error("lifecycle dispatcher stopped")]
    DispatcherStopped,
    #[error("frame rejected: {0}")]
    FrameRejected(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// 获取错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Broker(BrokerError::SessionUnreachable(_)) => ErrorCode::ConnectionClosed,
            Self::Broker(_) => ErrorCode::BrokerUnavailable,
            Self::DispatcherStopped => ErrorCode::DispatcherStopped,
            Self::FrameRejected(_) => ErrorCode::FrameRejected,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
