//! 连接生命周期
//!
//! 传输层的连接通知被转换为 [`LifecycleEvent`]，经由有界通道送到
//! 单个分发任务，由 [`ConnectionLifecycleCoordinator`] 依次处理。

use std::fmt;

use crate::model::{SessionId, UserId};

pub mod coordinator;
pub mod dispatcher;

pub use coordinator::ConnectionLifecycleCoordinator;
pub use dispatcher::{LifecycleDispatcher, LifecycleHandle};

/// 连接生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// 收到 CONNECT 帧（身份可能尚未绑定）
    ConnectRequested {
        session_id: SessionId,
        /// CONNECT 帧身份头中的原始值
        user_header: Option<UserId>,
    },
    /// 连接建立成功
    Connected {
        session_id: Option<SessionId>,
        user_id: Option<UserId>,
    },
    /// 连接断开（DISCONNECT 帧或传输层关闭，可能重复送达）
    Disconnected { session_id: SessionId },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectRequested { .. } => "connect_requested",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::ConnectRequested { session_id, .. } | Self::Disconnected { session_id } => {
                Some(session_id)
            }
            Self::Connected { session_id, .. } => session_id.as_ref(),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::ConnectRequested { user_header, .. } => user_header.as_ref(),
            Self::Connected { user_id, .. } => user_id.as_ref(),
            Self::Disconnected { .. } => None,
        }
    }
}

/// 单个连接的状态：`Connecting → Connected → Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// 已被驱逐，等待传输层的断开通知
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_accessors() {
        let event = LifecycleEvent::Connected {
            session_id: Some(SessionId::from("s-1")),
            user_id: None,
        };
        assert_eq!(event.kind(), "connected");
        assert_eq!(event.session_id(), Some(&SessionId::from("s-1")));
        assert_eq!(event.user_id(), None);

        let event = LifecycleEvent::Disconnected {
            session_id: SessionId::from("s-2"),
        };
        assert_eq!(event.session_id(), Some(&SessionId::from("s-2")));
    }
}
