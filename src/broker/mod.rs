//! 外部消息代理（Broker）接口
//!
//! 连接核心只依赖两个能力：向用户的私有队列投递消息、强制关闭某个会话。
//! 生命周期通知由 Broker 以 [`LifecycleEvent`](crate::lifecycle::LifecycleEvent)
//! 的形式送入生命周期分发器。

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::model::{SessionId, UserId};

pub mod local;

pub use local::{LocalBroker, Outbound};

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 向用户的私有目的地投递消息（投递到该用户当前的全部会话）
    async fn send_to_user(
        &self,
        user_id: &UserId,
        destination: &str,
        payload: String,
    ) -> Result<(), BrokerError>;

    /// 关闭会话底层连接
    async fn close_connection(&self, session_id: &SessionId) -> Result<(), BrokerError>;
}

/// 用户私有目的地：`{prefix}/{user}{destination}`
pub fn user_destination(prefix: &str, user_id: &UserId, destination: &str) -> String {
    format!(
        "{}/{}{}",
        prefix.trim_end_matches('/'),
        user_id,
        destination
    )
}
