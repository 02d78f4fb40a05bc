//! STOMP 帧处理
//!
//! - `command`：命令定义与"是否允许消息体"规则
//! - `normalizer`：修复缺失的结束符与分隔空行
//! - `codec`：最小化的帧解析与编码
//! - `inspect`：入站帧诊断日志

pub mod codec;
pub mod command;
pub mod inspect;
pub mod normalizer;

pub use codec::{FrameParseError, StompFrame};
pub use command::{StompCommand, UnknownCommand};
pub use inspect::{FrameInspection, FrameInspector};
pub use normalizer::{FrameNormalizer, normalize_frame};

/// 帧结束符
pub const FRAME_TERMINATOR: char = '\0';
