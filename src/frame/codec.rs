//! STOMP 帧编解码
//!
//! 仅覆盖连接核心需要的子集：读取命令与头部（用于身份绑定、诊断），
//! 以及为强制下线通知构造 MESSAGE 帧。完整的协议语义由 Broker 负责。

use std::fmt::Write as _;

use super::command::{StompCommand, UnknownCommand};
use super::FRAME_TERMINATOR;

/// 帧解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameParseError {
    #[error("frame is not terminated by NUL")]
    MissingTerminator,
    #[error("frame has no blank line after headers")]
    MissingHeaderSeparator,
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    #[error("{0} frames must not carry a body")]
    UnexpectedBody(StompCommand),
}

/// 一个完整的 STOMP 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// 读取头部（重复头部以第一次出现为准）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 解析以 NUL 结尾的文本帧
    ///
    /// 容忍帧前的心跳换行与 CRLF 行尾。
    pub fn parse(payload: &str) -> Result<Self, FrameParseError> {
        let content = payload
            .strip_suffix(FRAME_TERMINATOR)
            .ok_or(FrameParseError::MissingTerminator)?
            .trim_start_matches(['\r', '\n']);

        let (command_line, mut rest) = content
            .split_once('\n')
            .ok_or(FrameParseError::MissingHeaderSeparator)?;
        let command: StompCommand = strip_cr(command_line).parse()?;
        // CONNECT / CONNECTED 帧的头部不做转义
        let escaped = !matches!(
            command,
            StompCommand::Connect | StompCommand::Connected
        );

        let mut headers = Vec::new();
        loop {
            let (line, remainder) = rest
                .split_once('\n')
                .ok_or(FrameParseError::MissingHeaderSeparator)?;
            rest = remainder;

            let line = strip_cr(line);
            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameParseError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        if !command.is_body_allowed() && !rest.is_empty() {
            return Err(FrameParseError::UnexpectedBody(command));
        }

        Ok(Self {
            command,
            headers,
            body: rest.to_string(),
        })
    }

    /// 编码为以 NUL 结尾的文本帧
    pub fn encode(&self) -> String {
        let escaped = !matches!(
            self.command,
            StompCommand::Connect | StompCommand::Connected
        );
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escaped {
                let _ = writeln!(out, "{}:{}", escape(name), escape(value));
            } else {
                let _ = writeln!(out, "{name}:{value}");
            }
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(FRAME_TERMINATOR);
        out
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn unescape(raw: &str) -> Result<String, FrameParseError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => return Err(FrameParseError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}
