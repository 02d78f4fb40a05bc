//! 进程内 Broker
//!
//! 每个会话一个出站通道；传输层（WebSocket 写循环等）持有接收端，
//! 把 [`Outbound::Frame`] 原样写出，收到 [`Outbound::Close`] 后关闭连接。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MessageBroker, user_destination};
use crate::error::BrokerError;
use crate::frame::{StompCommand, StompFrame};
use crate::model::{SessionId, UserId};
use crate::registry::ConnectionRegistry;

/// 发往单个会话的出站指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// 已编码、以 NUL 结尾的 STOMP 帧
    Frame(String),
    /// 关闭连接
    Close,
}

pub struct LocalBroker {
    registry: Arc<ConnectionRegistry>,
    outbound: DashMap<SessionId, mpsc::UnboundedSender<Outbound>>,
    user_destination_prefix: String,
}

impl LocalBroker {
    pub fn new(registry: Arc<ConnectionRegistry>, user_destination_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            outbound: DashMap::new(),
            user_destination_prefix: user_destination_prefix.into(),
        }
    }

    /// 为新连接建立出站通道
    ///
    /// 连接关闭时需调用 [`detach`](Self::detach)，经由
    /// [`StompRuntime::close_connection`](crate::StompRuntime::close_connection) 时自动完成。
    pub fn attach(&self, session_id: SessionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.outbound.insert(session_id.clone(), tx).is_some() {
            warn!(session_id = %session_id, "Outbound channel replaced for existing session");
        }
        rx
    }

    /// 连接关闭后移除出站通道
    pub fn detach(&self, session_id: &SessionId) -> bool {
        self.outbound.remove(session_id).is_some()
    }

    pub fn attached_sessions(&self) -> usize {
        self.outbound.len()
    }

    fn message_frame(&self, user_id: &UserId, destination: &str, payload: &str) -> String {
        StompFrame::new(StompCommand::Message)
            .with_header(
                "destination",
                user_destination(&self.user_destination_prefix, user_id, destination),
            )
            .with_header("message-id", Uuid::new_v4().to_string())
            .with_header("content-type", "application/json")
            .with_header("content-length", payload.len().to_string())
            .with_body(payload)
            .encode()
    }
}

#[async_trait]
impl MessageBroker for LocalBroker {
    async fn send_to_user(
        &self,
        user_id: &UserId,
        destination: &str,
        payload: String,
    ) -> Result<(), BrokerError> {
        let sessions = self.registry.user_sessions(user_id);
        if sessions.is_empty() {
            return Err(BrokerError::UserOffline(user_id.to_string()));
        }

        let mut delivered = 0usize;
        let mut unreachable = None;
        for session_id in &sessions {
            let sent = self
                .outbound
                .get(session_id)
                .map(|tx| {
                    tx.send(Outbound::Frame(
                        self.message_frame(user_id, destination, &payload),
                    ))
                    .is_ok()
                })
                .unwrap_or(false);

            if sent {
                delivered += 1;
            } else {
                warn!(user_id = %user_id, session_id = %session_id, "Session outbound channel unavailable");
                unreachable.get_or_insert_with(|| session_id.clone());
            }
        }

        debug!(
            user_id = %user_id,
            destination = %destination,
            delivered,
            "Delivered message to user"
        );

        match (delivered, unreachable) {
            (0, Some(session_id)) => Err(BrokerError::SessionUnreachable(session_id.into_inner())),
            _ => Ok(()),
        }
    }

    async fn close_connection(&self, session_id: &SessionId) -> Result<(), BrokerError> {
        let (_, tx) = self
            .outbound
            .remove(session_id)
            .ok_or_else(|| BrokerError::SessionUnreachable(session_id.to_string()))?;

        tx.send(Outbound::Close)
            .map_err(|_| BrokerError::SessionUnreachable(session_id.to_string()))?;
        debug!(session_id = %session_id, "Close signal sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<ConnectionRegistry>, LocalBroker) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker = LocalBroker::new(registry.clone(), "/user");
        (registry, broker)
    }

    #[tokio::test]
    async fn send_to_user_delivers_message_frame() {
        let (registry, broker) = setup();
        let user_id = UserId::from("alice");
        let session_id = SessionId::from("s-1");
        registry.register(&user_id, &session_id);
        let mut rx = broker.attach(session_id.clone());

        broker
            .send_to_user(&user_id, "/queue/notifications", "{\"ok\":true}".to_string())
            .await
            .unwrap();

        let Some(Outbound::Frame(raw)) = rx.recv().await else {
            panic!("expected a frame");
        };
        let frame = StompFrame::parse(&raw).unwrap();
        assert_eq!(frame.command, StompCommand::Message);
        assert_eq!(
            frame.header("destination"),
            Some("/user/alice/queue/notifications")
        );
        assert_eq!(frame.header("content-length"), Some("11"));
        assert!(frame.header("message-id").is_some());
        assert_eq!(frame.body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn offline_user_is_reported() {
        let (_, broker) = setup();
        let err = broker
            .send_to_user(&UserId::from("ghost"), "/queue/notifications", String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UserOffline(_)));
    }

    #[tokio::test]
    async fn dropped_receiver_makes_session_unreachable() {
        let (registry, broker) = setup();
        let user_id = UserId::from("alice");
        let session_id = SessionId::from("s-1");
        registry.register(&user_id, &session_id);
        drop(broker.attach(session_id.clone()));

        let err = broker
            .send_to_user(&user_id, "/queue/notifications", String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::SessionUnreachable(id) if id == "s-1"));
    }

    #[tokio::test]
    async fn close_connection_signals_once() {
        let (_, broker) = setup();
        let session_id = SessionId::from("s-1");
        let mut rx = broker.attach(session_id.clone());

        broker.close_connection(&session_id).await.unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert_eq!(rx.recv().await, None);
        assert_eq!(broker.attached_sessions(), 0);

        assert!(broker.close_connection(&session_id).await.is_err());
    }
}
