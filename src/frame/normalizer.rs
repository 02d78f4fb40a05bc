//! 帧修复
//!
//! 部分客户端实现发送的文本帧缺少 NUL 结束符，或者在无消息体命令后
//! 缺少头部与消息体之间的空行。这里在帧交给 Broker 解析之前补齐这两处缺陷，
//! 不改动任何有语义的内容。

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, trace};

use super::command::StompCommand;
use super::FRAME_TERMINATOR;
use crate::metrics::ConnectionMetrics;
use crate::model::SessionId;
use crate::pipeline::FrameStage;

/// 修复缺少结束符/分隔空行的文本帧
///
/// - 已经以 NUL 结尾的帧原样返回
/// - 无法解析出命令（没有换行，或命令不可识别）的帧原样返回
/// - 不允许消息体的命令补齐空行
/// - 最后补上 NUL 结束符
pub fn normalize_frame(payload: &str) -> Cow<'_, str> {
    if payload.ends_with(FRAME_TERMINATOR) {
        return Cow::Borrowed(payload);
    }

    let Some(command) = leading_command(payload) else {
        trace!("unrecognized STOMP command, frame passed through");
        return Cow::Borrowed(payload);
    };

    let mut repaired = String::with_capacity(payload.len() + 3);
    repaired.push_str(payload);

    if !command.is_body_allowed() && !payload.ends_with("\n\n") {
        if payload.ends_with('\n') {
            repaired.push('\n');
        } else {
            repaired.push_str("\n\n");
        }
    }
    repaired.push(FRAME_TERMINATOR);

    Cow::Owned(repaired)
}

/// 解析首行命令（首个换行符之前的子串）
pub fn leading_command(payload: &str) -> Option<StompCommand> {
    let (first_line, _) = payload.split_once('\n')?;
    first_line.parse().ok()
}

/// 帧修复处理阶段
pub struct FrameNormalizer {
    metrics: Arc<ConnectionMetrics>,
}

impl FrameNormalizer {
    pub fn new(metrics: Arc<ConnectionMetrics>) -> Self {
        Self { metrics }
    }
}

impl FrameStage for FrameNormalizer {
    fn name(&self) -> &'static str {
        "normalizer"
    }

    fn process<'a>(&self, session_id: &SessionId, frame: Cow<'a, str>) -> Cow<'a, str> {
        let repaired = match normalize_frame(&frame) {
            Cow::Borrowed(_) => None,
            Cow::Owned(repaired) => Some(repaired),
        };
        let Some(repaired) = repaired else {
            return frame;
        };

        debug!(
            session_id = %session_id,
            original_len = frame.len(),
            repaired_len = repaired.len(),
            "Repaired incomplete STOMP frame"
        );
        self.metrics.frames_repaired_total.inc();
        Cow::Owned(repaired)
    }
}
