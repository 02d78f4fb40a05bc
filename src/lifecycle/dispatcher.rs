//! 生命周期事件分发
//!
//! 所有事件经由一个有界通道进入单个分发任务，按到达顺序逐个处理，
//! 因此同一会话的事件不会乱序。单个事件处理中的 panic 被捕获并记录，
//! 分发任务继续处理后续事件。通道关闭后等待未完成的驱逐通知再退出。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{ConnectionLifecycleCoordinator, LifecycleEvent};
use crate::error::{GatewayError, Result};
use crate::utils::panic_message;

/// 事件发送端，可克隆
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    /// 投递事件；通道已满时等待
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| GatewayError::DispatcherStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct LifecycleDispatcher;

impl LifecycleDispatcher {
    /// 启动分发任务
    ///
    /// 全部 [`LifecycleHandle`] 被丢弃后，分发任务处理完剩余事件并退出。
    pub fn spawn(
        coordinator: Arc<ConnectionLifecycleCoordinator>,
        capacity: usize,
    ) -> (LifecycleHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(coordinator, rx));
        (LifecycleHandle { tx }, task)
    }
}

async fn run(
    coordinator: Arc<ConnectionLifecycleCoordinator>,
    mut rx: mpsc::Receiver<LifecycleEvent>,
) {
    info!("Lifecycle dispatcher started");

    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        let session_id = event.session_id().cloned();
        let user_id = event.user_id().cloned();

        let outcome = AssertUnwindSafe(coordinator.handle(event))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            coordinator.metrics().lifecycle_event_panics_total.inc();
            error!(
                event = kind,
                session_id = ?session_id,
                user_id = ?user_id,
                panic = %panic_message(panic.as_ref()),
                "Lifecycle event handler panicked"
            );
        }
    }

    coordinator.drain_notices().await;
    info!("Lifecycle dispatcher stopped");
}
