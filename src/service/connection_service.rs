//! 连接管理服务
//!
//! 在注册表之上提供面向业务的操作：顶掉同一用户的旧连接并通知、
//! 查询在线状态、向在线用户发送系统通知。

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::MessageBroker;
use crate::config::StompCoreConfig;
use crate::error::{BrokerError, Result};
use crate::metrics::ConnectionMetrics;
use crate::model::{SessionId, UserId};
use crate::registry::ConnectionRegistry;
use crate::utils::{current_millis, panic_message};

/// 强制下线通知消息体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// 被关闭的会话
    pub session_id: String,
    pub timestamp: i64,
}

impl EvictionNotice {
    pub const KIND: &'static str = "SESSION_REPLACED";

    pub fn new(message: impl Into<String>, evicted: &SessionId) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            message: message.into(),
            session_id: evicted.to_string(),
            timestamp: current_millis(),
        }
    }
}

/// 一次驱逐的通知结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: usize,
    pub notices_sent: usize,
    pub notices_failed: usize,
    pub closes_failed: usize,
}

pub struct ConnectionService {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn MessageBroker>,
    notification_destination: String,
    eviction_notice: String,
    broker_timeout: Duration,
    metrics: Arc<ConnectionMetrics>,
}

impl ConnectionService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn MessageBroker>,
        config: &StompCoreConfig,
        metrics: Arc<ConnectionMetrics>,
    ) -> Self {
        Self {
            registry,
            broker,
            notification_destination: config.stomp.notification_destination.clone(),
            eviction_notice: config.stomp.eviction_notice.clone(),
            broker_timeout: config.lifecycle.broker_timeout(),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 关闭用户除 `keep` 之外的全部会话并通知，返回被关闭的会话数
    pub async fn disconnect_previous_sessions(&self, user_id: &UserId, keep: &SessionId) -> usize {
        let evicted = self.registry.evict_others(user_id, keep);
        if evicted.is_empty() {
            return 0;
        }

        self.metrics.sessions_evicted_total.inc_by(evicted.len() as u64);
        self.metrics
            .active_sessions
            .set(self.registry.total_sessions() as i64);
        self.notify_evicted(user_id, keep, &evicted).await;
        evicted.len()
    }

    /// 通知并关闭已从注册表移除的会话
    ///
    /// 每个被驱逐的会话发送一条通知到用户私有队列，随后关闭该会话。
    /// 任何失败只记录日志与指标，注册表中的驱逐结果不回滚。
    pub async fn notify_evicted(
        &self,
        user_id: &UserId,
        kept: &SessionId,
        evicted: &HashSet<SessionId>,
    ) -> EvictionReport {
        let mut report = EvictionReport {
            evicted: evicted.len(),
            ..EvictionReport::default()
        };

        let mut sessions: Vec<&SessionId> = evicted.iter().collect();
        sessions.sort();

        for session_id in sessions {
            match self.eviction_payload(session_id) {
                Ok(payload) => {
                    let sent = self
                        .call_broker(self.broker.send_to_user(
                            user_id,
                            &self.notification_destination,
                            payload,
                        ))
                        .await;
                    match sent {
                        Ok(()) => report.notices_sent += 1,
                        Err(e) => {
                            report.notices_failed += 1;
                            self.metrics.eviction_notify_failures_total.inc();
                            warn!(
                                user_id = %user_id,
                                session_id = %session_id,
                                error = %e,
                                "Failed to send eviction notice"
                            );
                        }
                    }
                }
                Err(e) => {
                    report.notices_failed += 1;
                    self.metrics.eviction_notify_failures_total.inc();
                    warn!(session_id = %session_id, error = %e, "Failed to encode eviction notice");
                }
            }

            if let Err(e) = self
                .call_broker(self.broker.close_connection(session_id))
                .await
            {
                report.closes_failed += 1;
                self.metrics.eviction_notify_failures_total.inc();
                warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %e,
                    "Failed to close evicted session"
                );
            }
        }

        info!(
            user_id = %user_id,
            kept_session_id = %kept,
            evicted = report.evicted,
            notices_failed = report.notices_failed,
            closes_failed = report.closes_failed,
            "Previous sessions of user closed"
        );
        report
    }

    pub fn active_session_count(&self, user_id: &UserId) -> usize {
        self.registry.session_count(user_id)
    }

    pub fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.registry.is_user_connected(user_id)
    }

    /// 向在线用户发送系统通知；用户不在线时不发送，返回 `Ok(false)`
    pub async fn send_system_notification(
        &self,
        user_id: &UserId,
        message: impl Into<String>,
    ) -> Result<bool> {
        if !self.is_user_connected(user_id) {
            debug!(user_id = %user_id, "User offline, system notification skipped");
            return Ok(false);
        }

        let message = message.into();
        debug!(user_id = %user_id, message = %message, "Sending system notification");
        self.call_broker(self.broker.send_to_user(
            user_id,
            &self.notification_destination,
            message,
        ))
        .await?;
        Ok(true)
    }

    pub fn connected_users(&self) -> HashSet<UserId> {
        self.registry.all_active_users()
    }

    fn eviction_payload(&self, evicted: &SessionId) -> serde_json::Result<String> {
        serde_json::to_string(&EvictionNotice::new(self.eviction_notice.clone(), evicted))
    }

    /// 调用 Broker：超时与 panic 都转换为 [`BrokerError`]
    async fn call_broker<F>(&self, call: F) -> Result<(), BrokerError>
    where
        F: Future<Output = Result<(), BrokerError>>,
    {
        match tokio::time::timeout(self.broker_timeout, AssertUnwindSafe(call).catch_unwind())
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(BrokerError::Other(anyhow!(
                "broker call panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(BrokerError::Timeout(self.broker_timeout)),
        }
    }
}
