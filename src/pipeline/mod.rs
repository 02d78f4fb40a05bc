//! 入站帧处理管道
//!
//! 帧在交给 Broker 之前依次经过若干处理阶段（修复、诊断等），
//! 每个阶段接收一帧并返回（可能被修改的）帧。

use std::borrow::Cow;
use std::sync::Arc;

use crate::config::StompSettings;
use crate::frame::{FrameInspector, FrameNormalizer};
use crate::metrics::ConnectionMetrics;
use crate::model::SessionId;

pub mod inbound;
pub mod principals;

pub use inbound::{FrameHandler, InboundProcessor};
pub use principals::ConnectionPrincipals;

/// 帧处理阶段
pub trait FrameStage: Send + Sync {
    /// 阶段名称（用于日志）
    fn name(&self) -> &'static str;

    /// 处理一帧；不需要修改时原样返回借用
    fn process<'a>(&self, session_id: &SessionId, frame: Cow<'a, str>) -> Cow<'a, str>;
}

/// 按顺序组合的处理阶段
#[derive(Clone, Default)]
pub struct FramePipeline {
    stages: Vec<Arc<dyn FrameStage>>,
}

impl FramePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个处理阶段
    pub fn with_stage(mut self, stage: Arc<dyn FrameStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// 按配置组装：修复阶段在前，诊断阶段在后（诊断看到的是修复后的帧）
    pub fn from_settings(settings: &StompSettings, metrics: Arc<ConnectionMetrics>) -> Self {
        let mut pipeline = Self::new();
        if settings.normalize_frames {
            pipeline = pipeline.with_stage(Arc::new(FrameNormalizer::new(metrics)));
        }
        if settings.inspect_frames {
            pipeline = pipeline.with_stage(Arc::new(FrameInspector));
        }
        pipeline
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 依次应用全部阶段
    pub fn apply<'a>(&self, session_id: &SessionId, frame: &'a str) -> Cow<'a, str> {
        self.stages
            .iter()
            .fold(Cow::Borrowed(frame), |frame, stage| {
                stage.process(session_id, frame)
            })
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
