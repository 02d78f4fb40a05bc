//! 连接核心组装
//!
//! 按配置创建注册表、进程内 Broker、连接服务、生命周期协调器与分发任务。
//! 使用外部 Broker 时可直接组装各组件，不必经过这里。

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::LocalBroker;
use crate::config::StompCoreConfig;
use crate::error::Result;
use crate::lifecycle::{ConnectionLifecycleCoordinator, LifecycleDispatcher, LifecycleHandle};
use crate::metrics::ConnectionMetrics;
use crate::model::SessionId;
use crate::pipeline::{FrameHandler, FramePipeline, InboundProcessor};
use crate::registry::ConnectionRegistry;
use crate::service::ConnectionService;

pub struct StompRuntime {
    config: StompCoreConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub broker: Arc<LocalBroker>,
    pub service: Arc<ConnectionService>,
    pub coordinator: Arc<ConnectionLifecycleCoordinator>,
    pub metrics: Arc<ConnectionMetrics>,
    lifecycle: LifecycleHandle,
    dispatcher: JoinHandle<()>,
}

impl StompRuntime {
    /// 启动（需要在 tokio 运行时内调用）
    pub fn start(config: StompCoreConfig) -> Self {
        let metrics = Arc::new(ConnectionMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broker = Arc::new(LocalBroker::new(
            registry.clone(),
            config.stomp.user_destination_prefix.clone(),
        ));
        let service = Arc::new(ConnectionService::new(
            registry.clone(),
            broker.clone(),
            &config,
            metrics.clone(),
        ));
        let coordinator = Arc::new(ConnectionLifecycleCoordinator::new(
            service.clone(),
            metrics.clone(),
        ));
        let (lifecycle, dispatcher) = LifecycleDispatcher::spawn(
            coordinator.clone(),
            config.lifecycle.event_channel_capacity,
        );

        info!(
            user_id_header = %config.stomp.user_id_header,
            normalize_frames = config.stomp.normalize_frames,
            inspect_frames = config.stomp.inspect_frames,
            "STOMP connection core started"
        );

        Self {
            config,
            registry,
            broker,
            service,
            coordinator,
            metrics,
            lifecycle,
            dispatcher,
        }
    }

    pub fn config(&self) -> &StompCoreConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    /// 为下游处理器创建入站帧处理入口
    pub fn processor(&self, handler: Arc<dyn FrameHandler>) -> InboundProcessor {
        InboundProcessor::new(
            FramePipeline::from_settings(&self.config.stomp, self.metrics.clone()),
            self.lifecycle.clone(),
            handler,
            &self.config.stomp,
        )
    }

    /// 传输层连接关闭：移除出站通道并投递断开事件
    pub async fn close_connection(
        &self,
        processor: &InboundProcessor,
        session_id: &SessionId,
    ) -> Result<()> {
        self.broker.detach(session_id);
        processor.on_connection_closed(session_id).await
    }

    /// 停止接收新事件，等待已排队的事件与驱逐通知处理完毕
    ///
    /// 由本运行时创建的 [`InboundProcessor`] 与 [`LifecycleHandle`] 需先行丢弃。
    pub async fn shutdown(self) -> Result<()> {
        drop(self.lifecycle);
        self.dispatcher
            .await
            .context("lifecycle dispatcher terminated abnormally")?;
        info!("STOMP connection core stopped");
        Ok(())
    }
}
