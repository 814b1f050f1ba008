use std::collections::HashMap;
use std::sync::RwLock;

use domain::UserId;

/// 在线状态变化回调。
///
/// 由推送中心的事件循环同步调用，实现方不能阻塞；
/// 需要做 I/O 的实现应自行转交给后台任务。
pub trait PresenceObserver: Send + Sync {
    fn presence_changed(&self, user_id: UserId, online: bool);
}

/// 只记录日志的观察者
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPresenceObserver;

impl PresenceObserver for LoggingPresenceObserver {
    fn presence_changed(&self, user_id: UserId, online: bool) {
        if online {
            tracing::info!(user_id = %user_id, "用户上线");
        } else {
            tracing::info!(user_id = %user_id, "用户下线");
        }
    }
}

/// 在线用户快照。
///
/// 只有推送中心的事件循环会写入；HTTP 查询等读者拿到的是某个时刻的一致视图。
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    sessions: RwLock<HashMap<UserId, usize>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前在线的用户（至少有一个会话）
    pub fn online_user_ids(&self) -> Vec<UserId> {
        match self.sessions.read() {
            Ok(guard) => guard.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.session_count(user_id) > 0
    }

    /// 指定用户的会话数，离线为 0
    pub fn session_count(&self, user_id: UserId) -> usize {
        match self.sessions.read() {
            Ok(guard) => guard.get(&user_id).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(&user_id).copied().unwrap_or(0),
        }
    }

    /// 所有用户的会话总数
    pub fn total_session_count(&self) -> usize {
        match self.sessions.read() {
            Ok(guard) => guard.values().sum(),
            Err(poisoned) => poisoned.into_inner().values().sum(),
        }
    }

    /// 写入某个用户的会话数，0 表示移除
    pub(crate) fn record(&self, user_id: UserId, count: usize) {
        let mut guard = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if count == 0 {
            guard.remove(&user_id);
        } else {
            guard.insert(user_id, count);
        }
    }

    pub(crate) fn clear(&self) {
        let mut guard = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
    }
}

/// 记录所有回调的观察者（用于测试）
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingPresenceObserver {
        changes: Mutex<Vec<(UserId, bool)>>,
    }

    impl RecordingPresenceObserver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn changes(&self) -> Vec<(UserId, bool)> {
            match self.changes.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    impl PresenceObserver for RecordingPresenceObserver {
        fn presence_changed(&self, user_id: UserId, online: bool) {
            let mut guard = match self.changes.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.push((user_id, online));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn directory_tracks_counts_per_user() {
        let directory = PresenceDirectory::new();
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());

        directory.record(alice, 2);
        directory.record(bob, 1);
        assert_eq!(directory.session_count(alice), 2);
        assert_eq!(directory.total_session_count(), 3);
        assert!(directory.is_online(bob));

        directory.record(bob, 0);
        assert!(!directory.is_online(bob));
        assert_eq!(directory.online_user_ids(), vec![alice]);
    }
}
