//! 连接身份绑定
//!
//! CONNECT 帧中读取的用户身份绑定到连接上，之后同一连接的 SEND / SUBSCRIBE
//! 等帧都以该身份处理，直到 DISCONNECT 或连接关闭。

use dashmap::DashMap;

use crate::model::{SessionId, UserId};

#[derive(Debug, Default)]
pub struct ConnectionPrincipals {
    principals: DashMap<SessionId, UserId>,
}

impl ConnectionPrincipals {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定身份，返回此前绑定的身份（重复 CONNECT 时覆盖）
    pub fn bind(&self, session_id: SessionId, user_id: UserId) -> Option<UserId> {
        self.principals.insert(session_id, user_id)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<UserId> {
        self.principals
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn unbind(&self, session_id: &SessionId) -> Option<UserId> {
        self.principals
            .remove(session_id)
            .map(|(_, user_id)| user_id)
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}
