//! STOMP 命令

use std::fmt;
use std::str::FromStr;

/// STOMP 1.0 – 1.2 定义的全部命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    // 客户端命令
    Connect,
    Stomp,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Send,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    // 服务端命令
    Connected,
    Receipt,
    Message,
    Error,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Disconnect => "DISCONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Connected => "CONNECTED",
            Self::Receipt => "RECEIPT",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
        }
    }

    /// 该命令是否允许携带消息体
    ///
    /// 只有 SEND、MESSAGE、ERROR 允许消息体，其余命令即使没有消息体
    /// 也必须以空行结束头部。
    pub fn is_body_allowed(&self) -> bool {
        matches!(self, Self::Send | Self::Message | Self::Error)
    }

    /// 是否为建立连接的握手命令
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Connect | Self::Stomp)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 无法识别的命令
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown STOMP command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for StompCommand {
    type Err = UnknownCommand;

    /// 严格匹配（区分大小写，不裁剪空白）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "DISCONNECT" => Self::Disconnect,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "CONNECTED" => Self::Connected,
            "RECEIPT" => Self::Receipt,
            "MESSAGE" => Self::Message,
            "ERROR" => Self::Error,
            other => return Err(UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}
