//! 入站帧处理
//!
//! 每个入站文本帧：
//! 1. 经过 [`FramePipeline`]（修复、诊断）
//! 2. 解析命令与头部
//! 3. 在该连接绑定的用户身份作用域内交给 [`FrameHandler`]
//! 4. CONNECT / DISCONNECT 额外产生生命周期事件

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ConnectionPrincipals, FramePipeline};
use crate::config::StompSettings;
use crate::error::{GatewayError, Result};
use crate::frame::{StompCommand, StompFrame};
use crate::lifecycle::{LifecycleEvent, LifecycleHandle};
use crate::model::{SessionId, UserId};
use crate::utils::with_optional_user_scope;

/// 帧的下游处理（Broker 的协议处理或业务逻辑）
///
/// 调用期间可以通过 [`current_user_id`](crate::utils::current_user_id) 读取当前用户。
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, session_id: &SessionId, frame: StompFrame) -> Result<()>;
}

pub struct InboundProcessor {
    pipeline: FramePipeline,
    principals: ConnectionPrincipals,
    lifecycle: LifecycleHandle,
    handler: Arc<dyn FrameHandler>,
    user_id_header: String,
}

impl InboundProcessor {
    pub fn new(
        pipeline: FramePipeline,
        lifecycle: LifecycleHandle,
        handler: Arc<dyn FrameHandler>,
        settings: &StompSettings,
    ) -> Self {
        Self {
            pipeline,
            principals: ConnectionPrincipals::new(),
            lifecycle,
            handler,
            user_id_header: settings.user_id_header.clone(),
        }
    }

    /// 连接当前绑定的用户
    pub fn principal(&self, session_id: &SessionId) -> Option<UserId> {
        self.principals.get(session_id)
    }

    /// 处理一个入站文本帧
    pub async fn on_text_frame(&self, session_id: &SessionId, raw: &str) -> Result<()> {
        if raw.trim_matches(['\r', '\n']).is_empty() {
            // 心跳
            return Ok(());
        }

        let payload = self.pipeline.apply(session_id, raw);
        let frame = StompFrame::parse(&payload).map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Rejected inbound STOMP frame");
            GatewayError::FrameRejected(e.to_string())
        })?;

        match frame.command {
            StompCommand::Connect | StompCommand::Stomp => self.on_connect(session_id, frame).await,
            StompCommand::Disconnect => self.on_disconnect(session_id, frame).await,
            command => {
                let principal = self.principals.get(session_id);
                if principal.is_none()
                    && matches!(command, StompCommand::Send | StompCommand::Subscribe)
                {
                    warn!(
                        session_id = %session_id,
                        command = %command,
                        "Frame on connection without bound identity"
                    );
                }
                with_optional_user_scope(principal, self.handler.handle(session_id, frame)).await
            }
        }
    }

    /// 传输层连接关闭（未收到 DISCONNECT 帧时同样调用）
    pub async fn on_connection_closed(&self, session_id: &SessionId) -> Result<()> {
        self.principals.unbind(session_id);
        self.lifecycle
            .dispatch(LifecycleEvent::Disconnected {
                session_id: session_id.clone(),
            })
            .await
    }

    async fn on_connect(&self, session_id: &SessionId, frame: StompFrame) -> Result<()> {
        let user_header = frame
            .header(&self.user_id_header)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(UserId::from);

        match &user_header {
            Some(user_id) => {
                debug!(session_id = %session_id, user_id = %user_id, "Identity bound to connection");
                self.principals.bind(session_id.clone(), user_id.clone());
            }
            None => {
                warn!(
                    session_id = %session_id,
                    header = %self.user_id_header,
                    "CONNECT frame without identity header"
                );
                self.principals.unbind(session_id);
            }
        }

        self.lifecycle
            .dispatch(LifecycleEvent::ConnectRequested {
                session_id: session_id.clone(),
                user_header: user_header.clone(),
            })
            .await?;

        with_optional_user_scope(user_header.clone(), self.handler.handle(session_id, frame))
            .await?;

        self.lifecycle
            .dispatch(LifecycleEvent::Connected {
                session_id: Some(session_id.clone()),
                user_id: user_header,
            })
            .await
    }

    async fn on_disconnect(&self, session_id: &SessionId, frame: StompFrame) -> Result<()> {
        let principal = self.principals.get(session_id);
        let handled =
            with_optional_user_scope(principal, self.handler.handle(session_id, frame)).await;

        self.principals.unbind(session_id);
        self.lifecycle
            .dispatch(LifecycleEvent::Disconnected {
                session_id: session_id.clone(),
            })
            .await?;
        handled
    }
}
