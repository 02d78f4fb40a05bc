//! 帧诊断
//!
//! 只读处理阶段：记录入站帧的命令、长度、结束符与分隔空行情况，
//! 对修复后仍不完整的 CONNECT 帧给出告警。trace 级别下输出十六进制转储。

use std::borrow::Cow;

use tracing::{Level, debug, enabled, trace, warn};

use super::FRAME_TERMINATOR;
use super::normalizer::leading_command;
use crate::model::SessionId;
use crate::pipeline::FrameStage;

/// 帧结构检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInspection {
    pub payload_len: usize,
    pub has_terminator: bool,
    /// 头部与消息体之间空行的字节位置
    pub separator_at: Option<usize>,
}

impl FrameInspection {
    pub fn of(payload: &str) -> Self {
        Self {
            payload_len: payload.len(),
            has_terminator: payload.ends_with(FRAME_TERMINATOR),
            separator_at: payload.find("\n\n"),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.has_terminator && self.separator_at.is_some()
    }
}

/// 十六进制转储（`43 4F 4E ...`）
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(1)
        .map(hex::encode_upper)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 帧诊断处理阶段
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameInspector;

impl FrameStage for FrameInspector {
    fn name(&self) -> &'static str {
        "inspector"
    }

    fn process<'a>(&self, session_id: &SessionId, frame: Cow<'a, str>) -> Cow<'a, str> {
        let inspection = FrameInspection::of(&frame);
        let command = leading_command(&frame);

        debug!(
            session_id = %session_id,
            command = ?command,
            payload_len = inspection.payload_len,
            has_terminator = inspection.has_terminator,
            separator_at = ?inspection.separator_at,
            "Inbound STOMP frame"
        );

        if enabled!(Level::TRACE) {
            trace!(
                session_id = %session_id,
                hex = %hex_dump(frame.as_bytes()),
                text = ?frame,
                "Inbound STOMP frame bytes"
            );
        }

        if command.is_some_and(|c| c.is_handshake()) && !inspection.is_well_formed() {
            warn!(
                session_id = %session_id,
                has_terminator = inspection.has_terminator,
                has_separator = inspection.separator_at.is_some(),
                "Malformed STOMP handshake frame"
            );
        }

        frame
    }
}
