//! Flare STOMP Core
//!
//! STOMP 长连接的连接/会话管理核心：
//! - 维护用户 ⇄ 会话的实时索引，保证每个用户只保留一个活跃连接
//! - 在每个入站帧的处理期间传播当前用户身份
//! - 在帧交给 Broker 解析之前修复缺失的结束符与分隔空行

pub mod broker;
pub mod config;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod tracing;
pub mod utils;

pub use broker::{LocalBroker, MessageBroker, Outbound};
pub use config::{
    ConfigManager, LifecycleSettings, LoggingConfig, StompCoreConfig, StompSettings, app_config,
    load_config,
};
pub use error::{BrokerError, ErrorCode, GatewayError, Result};
pub use frame::{StompCommand, StompFrame, normalize_frame};
pub use lifecycle::{
    ConnectionLifecycleCoordinator, ConnectionState, LifecycleDispatcher, LifecycleEvent,
    LifecycleHandle,
};
pub use metrics::ConnectionMetrics;
pub use model::{SessionId, UserId};
pub use pipeline::{FrameHandler, FramePipeline, FrameStage, InboundProcessor};
pub use registry::{ConnectionRegistry, RegistrationOutcome};
pub use runtime::StompRuntime;
pub use service::ConnectionService;
pub use utils::{current_user_id, with_user_scope};
