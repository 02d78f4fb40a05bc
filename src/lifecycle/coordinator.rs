//! 生命周期协调器
//!
//! - ConnectRequested：仅记录，会话进入 `Connecting`
//! - Connected：身份与会话都已知时独占注册；顶掉的旧会话交给
//!   [`ConnectionService`] 在独立任务中通知并关闭，不阻塞后续事件
//! - Disconnected：从注册表移除（重复送达无副作用）

use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ConnectionState, LifecycleEvent};
use crate::metrics::ConnectionMetrics;
use crate::model::{SessionId, UserId};
use crate::registry::ConnectionRegistry;
use crate::service::ConnectionService;

pub struct ConnectionLifecycleCoordinator {
    registry: Arc<ConnectionRegistry>,
    service: Arc<ConnectionService>,
    /// 注册表变更与状态写入在同一把锁内完成
    states: Mutex<HashMap<SessionId, ConnectionState>>,
    notices: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<ConnectionMetrics>,
}

impl ConnectionLifecycleCoordinator {
    pub fn new(service: Arc<ConnectionService>, metrics: Arc<ConnectionMetrics>) -> Self {
        Self {
            registry: service.registry().clone(),
            service,
            states: Mutex::new(HashMap::new()),
            notices: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn service(&self) -> &Arc<ConnectionService> {
        &self.service
    }

    pub fn metrics(&self) -> &Arc<ConnectionMetrics> {
        &self.metrics
    }

    /// 会话当前状态；断开后不再跟踪，返回 `None`
    pub fn connection_state(&self, session_id: &SessionId) -> Option<ConnectionState> {
        self.states.lock().get(session_id).copied()
    }

    /// 处理一个生命周期事件
    pub async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::ConnectRequested {
                session_id,
                user_header,
            } => self.on_connect_requested(session_id, user_header),
            LifecycleEvent::Connected {
                session_id,
                user_id,
            } => self.on_connected(session_id, user_id),
            LifecycleEvent::Disconnected { session_id } => self.on_disconnected(&session_id),
        }
    }

    /// 等待已发出的驱逐通知全部完成
    pub async fn drain_notices(&self) {
        loop {
            let pending = mem::take(&mut *self.notices.lock());
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        self.metrics.lifecycle_event_panics_total.inc();
                    }
                    error!(error = %e, "Eviction notice task failed");
                }
            }
        }
    }

    fn on_connect_requested(&self, session_id: SessionId, user_header: Option<UserId>) {
        debug!(
            session_id = %session_id,
            user_header = ?user_header,
            "STOMP connect requested"
        );
        self.states.lock().insert(session_id, ConnectionState::Connecting);
    }

    fn on_connected(&self, session_id: Option<SessionId>, user_id: Option<UserId>) {
        let (Some(session_id), Some(user_id)) = (session_id.clone(), user_id.clone()) else {
            warn!(
                session_id = ?session_id,
                user_id = ?user_id,
                "Connected without resolved user or session, not registered"
            );
            return;
        };

        let outcome = {
            let mut states = self.states.lock();
            let outcome = self.registry.register_exclusive(&user_id, &session_id);
            states.insert(session_id.clone(), ConnectionState::Connected);
            for evicted in &outcome.evicted {
                if let Some(state) = states.get_mut(evicted) {
                    *state = ConnectionState::Disconnected;
                }
            }
            outcome
        };
        self.metrics.sessions_registered_total.inc();
        self.sync_active_sessions();

        info!(
            user_id = %user_id,
            session_id = %session_id,
            observed_sessions = outcome.observed_sessions,
            "STOMP session connected"
        );

        if outcome.evicted.is_empty() {
            return;
        }

        self.metrics
            .sessions_evicted_total
            .inc_by(outcome.evicted.len() as u64);
        self.spawn_notice(user_id, session_id, outcome.evicted);
    }

    /// 通知与关闭可能等待 Broker 超时，放到独立任务中执行
    fn spawn_notice(&self, user_id: UserId, kept: SessionId, evicted: HashSet<SessionId>) {
        let service = self.service.clone();
        let task = tokio::spawn(async move {
            let report = service.notify_evicted(&user_id, &kept, &evicted).await;
            info!(
                user_id = %user_id,
                session_id = %kept,
                evicted = report.evicted,
                notices_sent = report.notices_sent,
                "Previous connections of user removed"
            );
        });

        let mut notices = self.notices.lock();
        notices.retain(|task| !task.is_finished());
        notices.push(task);
    }

    fn on_disconnected(&self, session_id: &SessionId) {
        let removed = {
            let mut states = self.states.lock();
            states.remove(session_id);
            self.registry.remove(session_id)
        };
        match removed {
            Some(user_id) => {
                self.metrics.sessions_disconnected_total.inc();
                info!(user_id = %user_id, session_id = %session_id, "STOMP session disconnected");
            }
            None => {
                debug!(session_id = %session_id, "Disconnect for unregistered session");
            }
        }
        self.sync_active_sessions();
    }

    fn sync_active_sessions(&self) {
        self.metrics
            .active_sessions
            .set(self.registry.total_sessions() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MessageBroker;
    use crate::config::StompCoreConfig;
    use crate::error::BrokerError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBroker {
        notices: Mutex<Vec<UserId>>,
        closed: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl MessageBroker for RecordingBroker {
        async fn send_to_user(
            &self,
            user_id: &UserId,
            _destination: &str,
            _payload: String,
        ) -> Result<(), BrokerError> {
            self.notices.lock().push(user_id.clone());
            Ok(())
        }

        async fn close_connection(&self, session_id: &SessionId) -> Result<(), BrokerError> {
            self.closed.lock().push(session_id.clone());
            Err(BrokerError::SessionUnreachable(session_id.to_string()))
        }
    }

    fn coordinator() -> (Arc<RecordingBroker>, ConnectionLifecycleCoordinator) {
        let broker = Arc::new(RecordingBroker::default());
        let metrics = Arc::new(ConnectionMetrics::new());
        let service = Arc::new(ConnectionService::new(
            Arc::new(ConnectionRegistry::new()),
            broker.clone(),
            &StompCoreConfig::default(),
            metrics.clone(),
        ));
        (broker, ConnectionLifecycleCoordinator::new(service, metrics))
    }

    fn connected(session: &str, user: &str) -> LifecycleEvent {
        LifecycleEvent::Connected {
            session_id: Some(SessionId::from(session)),
            user_id: Some(UserId::from(user)),
        }
    }

    #[tokio::test]
    async fn connect_requested_only_tracks_state() {
        let (_, coordinator) = coordinator();
        coordinator
            .handle(LifecycleEvent::ConnectRequested {
                session_id: SessionId::from("s-1"),
                user_header: Some(UserId::from("alice")),
            })
            .await;

        assert_eq!(
            coordinator.connection_state(&SessionId::from("s-1")),
            Some(ConnectionState::Connecting)
        );
        assert!(coordinator.registry().all_active_users().is_empty());
    }

    #[tokio::test]
    async fn missing_identity_is_not_registered() {
        let (broker, coordinator) = coordinator();
        coordinator
            .handle(LifecycleEvent::Connected {
                session_id: Some(SessionId::from("s-1")),
                user_id: None,
            })
            .await;
        coordinator
            .handle(LifecycleEvent::Connected {
                session_id: None,
                user_id: Some(UserId::from("alice")),
            })
            .await;

        assert_eq!(coordinator.registry().total_sessions(), 0);
        assert!(broker.closed.lock().is_empty());
    }

    #[tokio::test]
    async fn second_connection_evicts_first_even_if_close_fails() {
        let (broker, coordinator) = coordinator();
        coordinator.handle(connected("s-1", "alice")).await;
        coordinator.handle(connected("s-2", "alice")).await;
        coordinator.drain_notices().await;

        let alice = UserId::from("alice");
        assert_eq!(coordinator.registry().session_count(&alice), 1);
        assert_eq!(
            coordinator.registry().user_for_session(&SessionId::from("s-2")),
            Some(alice.clone())
        );
        assert_eq!(*broker.notices.lock(), vec![alice]);
        assert_eq!(*broker.closed.lock(), vec![SessionId::from("s-1")]);
        assert_eq!(
            coordinator.connection_state(&SessionId::from("s-1")),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(coordinator.metrics().eviction_notify_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn duplicate_disconnect_is_harmless() {
        let (_, coordinator) = coordinator();
        coordinator.handle(connected("s-1", "alice")).await;

        let disconnected = LifecycleEvent::Disconnected {
            session_id: SessionId::from("s-1"),
        };
        coordinator.handle(disconnected.clone()).await;
        coordinator.handle(disconnected).await;

        assert_eq!(coordinator.registry().total_sessions(), 0);
        assert_eq!(coordinator.connection_state(&SessionId::from("s-1")), None);
        assert_eq!(coordinator.metrics().sessions_disconnected_total.get(), 1);
        assert_eq!(coordinator.metrics().active_sessions.get(), 0);
    }
}
