//! 连接注册表
//!
//! 维护 用户ID ⇄ 会话ID 的双向索引，是连接核心中唯一的共享可变状态。
//!
//! 两张表由同一把读写锁保护：
//! - `session_user`：会话 → 用户（部分函数，每个会话至多属于一个用户）
//! - `user_sessions`：用户 → 会话集合（集合为空时整项移除）
//!
//! 任一写操作都在一个临界区内同时修改两张表，因此外部永远观察不到不一致的中间状态。

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::model::{SessionId, UserId};

/// 独占注册结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// 注册完成、驱逐之前该用户的会话数
    pub observed_sessions: usize,
    /// 被驱逐（已从注册表移除）的旧会话
    pub evicted: HashSet<SessionId>,
}

impl RegistrationOutcome {
    /// 是否发生了重复连接
    pub fn is_duplicate(&self) -> bool {
        self.observed_sessions > 1
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    session_user: HashMap<SessionId, UserId>,
    user_sessions: HashMap<UserId, HashSet<SessionId>>,
}

impl RegistryState {
    fn insert(&mut self, user_id: &UserId, session_id: &SessionId) -> usize {
        // 会话改绑到其他用户时，先从旧用户的集合中摘除
        if let Some(previous) = self
            .session_user
            .insert(session_id.clone(), user_id.clone())
        {
            if &previous != user_id {
                self.detach(&previous, session_id);
            }
        }

        let sessions = self.user_sessions.entry(user_id.clone()).or_default();
        sessions.insert(session_id.clone());
        sessions.len()
    }

    fn detach(&mut self, user_id: &UserId, session_id: &SessionId) -> usize {
        let Some(sessions) = self.user_sessions.get_mut(user_id) else {
            return 0;
        };
        sessions.remove(session_id);
        let remaining = sessions.len();
        if remaining == 0 {
            self.user_sessions.remove(user_id);
        }
        remaining
    }

    fn take_others(&mut self, user_id: &UserId, keep: &SessionId) -> HashSet<SessionId> {
        let Some(sessions) = self.user_sessions.get_mut(user_id) else {
            return HashSet::new();
        };

        let evicted: HashSet<SessionId> = sessions
            .iter()
            .filter(|session_id| *session_id != keep)
            .cloned()
            .collect();

        if evicted.is_empty() {
            return evicted;
        }

        sessions.retain(|session_id| session_id == keep);
        if sessions.is_empty() {
            self.user_sessions.remove(user_id);
        }
        for session_id in &evicted {
            self.session_user.remove(session_id);
        }
        evicted
    }
}

/// 连接注册表
///
/// 所有操作均为纯内存操作，不会失败：未知会话、未知用户表现为空结果。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话（幂等）
    ///
    /// 返回注册完成后该用户的会话数。
    pub fn register(&self, user_id: &UserId, session_id: &SessionId) -> usize {
        let count = self.state.write().insert(user_id, session_id);
        debug!(
            user_id = %user_id,
            session_id = %session_id,
            active_sessions = count,
            "Session registered"
        );
        count
    }

    /// 注册会话并在同一临界区内驱逐该用户的其他会话
    ///
    /// 并发的多个独占注册之间"后到者胜出"：每个旧会话恰好被驱逐一次，
    /// 且用户最终恰好保留一个会话。
    pub fn register_exclusive(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> RegistrationOutcome {
        let outcome = {
            let mut state = self.state.write();
            let observed_sessions = state.insert(user_id, session_id);
            let evicted = if observed_sessions > 1 {
                state.take_others(user_id, session_id)
            } else {
                HashSet::new()
            };
            RegistrationOutcome {
                observed_sessions,
                evicted,
            }
        };

        debug!(
            user_id = %user_id,
            session_id = %session_id,
            observed_sessions = outcome.observed_sessions,
            evicted = outcome.evicted.len(),
            "Session registered exclusively"
        );
        outcome
    }

    /// 移除会话
    ///
    /// 返回会话原先关联的用户；会话未知（已被移除或从未注册）时返回 `None`。
    pub fn remove(&self, session_id: &SessionId) -> Option<UserId> {
        let mut state = self.state.write();
        let user_id = state.session_user.remove(session_id)?;
        let remaining = state.detach(&user_id, session_id);
        drop(state);

        debug!(
            user_id = %user_id,
            session_id = %session_id,
            remaining_sessions = remaining,
            "Session removed"
        );
        Some(user_id)
    }

    /// 获取用户的活跃会话数（未知用户为 0）
    pub fn session_count(&self, user_id: &UserId) -> usize {
        self.state
            .read()
            .user_sessions
            .get(user_id)
            .map_or(0, HashSet::len)
    }

    /// 驱逐用户除 `keep` 以外的全部会话，返回被移除的会话集合
    pub fn evict_others(&self, user_id: &UserId, keep: &SessionId) -> HashSet<SessionId> {
        let evicted = self.state.write().take_others(user_id, keep);
        if !evicted.is_empty() {
            debug!(
                user_id = %user_id,
                kept_session = %keep,
                evicted = evicted.len(),
                "Previous sessions evicted"
            );
        }
        evicted
    }

    /// 获取所有活跃用户
    pub fn all_active_users(&self) -> HashSet<UserId> {
        self.state.read().user_sessions.keys().cloned().collect()
    }

    /// 获取用户的全部会话快照
    pub fn user_sessions(&self, user_id: &UserId) -> HashSet<SessionId> {
        self.state
            .read()
            .user_sessions
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 根据会话ID查询用户
    pub fn user_for_session(&self, session_id: &SessionId) -> Option<UserId> {
        self.state.read().session_user.get(session_id).cloned()
    }

    pub fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.session_count(user_id) > 0
    }

    /// 全部已登记的会话数
    pub fn total_sessions(&self) -> usize {
        self.state.read().session_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn session(id: &str) -> SessionId {
        SessionId::from(id)
    }

    /// 校验双向索引一致：会话出现在且仅出现在它映射到的用户集合中
    fn assert_consistent(registry: &ConnectionRegistry) {
        let state = registry.state.read();
        for (session_id, user_id) in &state.session_user {
            let owner_sets: Vec<_> = state
                .user_sessions
                .iter()
                .filter(|(_, sessions)| sessions.contains(session_id))
                .map(|(owner, _)| owner)
                .collect();
            assert_eq!(owner_sets, vec![user_id], "session {session_id} misplaced");
        }
        for (user_id, sessions) in &state.user_sessions {
            assert!(!sessions.is_empty(), "empty set left for {user_id}");
            for session_id in sessions {
                assert_eq!(state.session_user.get(session_id), Some(user_id));
            }
        }
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.register(&user("alice"), &session("s1")), 1);
        assert_eq!(registry.register(&user("alice"), &session("s1")), 1);
        assert_eq!(registry.session_count(&user("alice")), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn evict_others_keeps_only_requested_session() {
        let registry = ConnectionRegistry::new();
        let alice = user("alice");
        for id in ["s1", "s2", "s3"] {
            registry.register(&alice, &session(id));
        }

        let evicted = registry.evict_others(&alice, &session("s3"));

        assert_eq!(evicted, HashSet::from([session("s1"), session("s2")]));
        assert_eq!(registry.session_count(&alice), 1);
        assert_eq!(registry.user_for_session(&session("s1")), None);
        assert_eq!(registry.user_for_session(&session("s3")), Some(alice));
        assert_consistent(&registry);
    }

    #[test]
    fn evict_others_for_unknown_user_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.evict_others(&user("ghost"), &session("s1")).is_empty());
    }

    #[test]
    fn remove_unknown_session_returns_none() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.remove(&session("never")), None);

        registry.register(&user("alice"), &session("s1"));
        assert_eq!(registry.remove(&session("s1")), Some(user("alice")));
        assert_eq!(registry.remove(&session("s1")), None);
        assert!(registry.all_active_users().is_empty());
        assert_consistent(&registry);
    }

    #[test]
    fn rebinding_session_moves_it_between_users() {
        let registry = ConnectionRegistry::new();
        registry.register(&user("alice"), &session("s1"));
        registry.register(&user("bob"), &session("s1"));

        assert_eq!(registry.session_count(&user("alice")), 0);
        assert_eq!(registry.session_count(&user("bob")), 1);
        assert_eq!(registry.all_active_users(), HashSet::from([user("bob")]));
        assert_consistent(&registry);
    }

    #[test]
    fn register_exclusive_evicts_previous_sessions() {
        let registry = ConnectionRegistry::new();
        let alice = user("alice");

        let first = registry.register_exclusive(&alice, &session("s1"));
        assert!(!first.is_duplicate());
        assert!(first.evicted.is_empty());

        let second = registry.register_exclusive(&alice, &session("s2"));
        assert_eq!(second.observed_sessions, 2);
        assert_eq!(second.evicted, HashSet::from([session("s1")]));
        assert_eq!(registry.user_sessions(&alice), HashSet::from([session("s2")]));
        assert_consistent(&registry);
    }

    #[test]
    fn invariant_holds_for_mixed_operation_sequences() {
        let registry = ConnectionRegistry::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..2_000 {
            // xorshift，保证序列可复现
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let user_id = user(&format!("u{}", seed % 5));
            let session_id = session(&format!("s{}", (seed >> 8) % 12));
            match (seed >> 16) % 4 {
                0 | 1 => {
                    registry.register(&user_id, &session_id);
                }
                2 => {
                    registry.remove(&session_id);
                }
                _ => {
                    registry.evict_others(&user_id, &session_id);
                }
            }
            assert_consistent(&registry);
        }
    }

    #[test]
    fn concurrent_exclusive_registration_leaves_single_survivor() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alice = user("alice");

        let evicted_total: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let registry = Arc::clone(&registry);
                    let alice = alice.clone();
                    scope.spawn(move || {
                        registry
                            .register_exclusive(&alice, &session(&format!("s{i}")))
                            .evicted
                            .len()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(evicted_total, 31);
        assert_eq!(registry.session_count(&alice), 1);
        assert_eq!(registry.total_sessions(), 1);
        assert_consistent(&registry);
    }
}
