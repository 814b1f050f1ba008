use async_trait::async_trait;
use domain::{PostId, ScoreEntry};
use thiserror::Error;

/// 排行缓存错误，任何一种都会让读路径降级为内存排序
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScoreStoreError {
    #[error("score store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed score index entry: {0}")]
    Malformed(String),
}

impl ScoreStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 热度排行缓存：按复合分数排序的帖子索引 + 每个帖子的原始热度缓存
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// 有序索引中的帖子数，0 表示索引不存在或已过期
    async fn index_len(&self) -> Result<usize, ScoreStoreError>;

    /// 按复合分数降序读取 `[offset, offset + limit)`
    async fn range_desc(&self, offset: usize, limit: usize)
        -> Result<Vec<PostId>, ScoreStoreError>;

    /// 批量读取缓存的原始热度，结果与入参一一对应
    async fn cached_raw_scores(
        &self,
        post_ids: &[PostId],
    ) -> Result<Vec<Option<i64>>, ScoreStoreError>;

    /// 重建整个索引。
    ///
    /// `recomputed` 是本次从计数重新算出的条目，需要写回原始热度缓存；
    /// 索引本身用 `entries` 整体替换并设置过期时间。
    async fn rebuild(
        &self,
        entries: &[ScoreEntry],
        recomputed: &[ScoreEntry],
    ) -> Result<(), ScoreStoreError>;

    /// 覆盖单个帖子的原始热度缓存；索引存在时同时更新它的位置。
    ///
    /// 索引已过期时不单独写入，避免出现只含一个帖子的残缺索引。
    async fn upsert(&self, entry: &ScoreEntry) -> Result<(), ScoreStoreError>;

    /// 删除帖子的索引条目和原始热度缓存
    async fn remove(&self, post_id: PostId) -> Result<(), ScoreStoreError>;

    /// 丢弃整个索引，下一次读取会重建
    async fn invalidate(&self) -> Result<(), ScoreStoreError>;
}

/// 排行缓存未接入时使用的占位实现。
///
/// 所有操作都返回 [`ScoreStoreError::Unavailable`]，读路径因此始终走内存排序，
/// 写路径只记录日志。
#[derive(Debug, Clone)]
pub struct DisabledScoreStore {
    reason: String,
}

impl DisabledScoreStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> ScoreStoreError {
        ScoreStoreError::unavailable(self.reason.clone())
    }
}

#[async_trait]
impl ScoreStore for DisabledScoreStore {
    async fn index_len(&self) -> Result<usize, ScoreStoreError> {
        Err(self.error())
    }

    async fn range_desc(
        &self,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<PostId>, ScoreStoreError> {
        Err(self.error())
    }

    async fn cached_raw_scores(
        &self,
        _post_ids: &[PostId],
    ) -> Result<Vec<Option<i64>>, ScoreStoreError> {
        Err(self.error())
    }

    async fn rebuild(
        &self,
        _entries: &[ScoreEntry],
        _recomputed: &[ScoreEntry],
    ) -> Result<(), ScoreStoreError> {
        Err(self.error())
    }

    async fn upsert(&self, _entry: &ScoreEntry) -> Result<(), ScoreStoreError> {
        Err(self.error())
    }

    async fn remove(&self, _post_id: PostId) -> Result<(), ScoreStoreError> {
        Err(self.error())
    }

    async fn invalidate(&self) -> Result<(), ScoreStoreError> {
        Err(self.error())
    }
}

/// 内存实现的排行缓存（用于测试和无 Redis 的本地运行）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct State {
        index: HashMap<PostId, f64>,
        index_expires_at: Option<Instant>,
        raw_scores: HashMap<PostId, (i64, Instant)>,
    }

    impl State {
        fn expire(&mut self, now: Instant) {
            if matches!(self.index_expires_at, Some(at) if at <= now) {
                self.index.clear();
                self.index_expires_at = None;
            }
            self.raw_scores.retain(|_, (_, expires_at)| *expires_at > now);
        }
    }

    pub struct MemoryScoreStore {
        state: Mutex<State>,
        ttl: Duration,
        available: AtomicBool,
        rebuilds: AtomicUsize,
    }

    impl MemoryScoreStore {
        pub fn new(ttl: Duration) -> Self {
            Self {
                state: Mutex::new(State::default()),
                ttl,
                available: AtomicBool::new(true),
                rebuilds: AtomicUsize::new(0),
            }
        }

        /// 模拟后端不可用
        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        /// 已执行的重建次数
        pub fn rebuild_count(&self) -> usize {
            self.rebuilds.load(Ordering::SeqCst)
        }

        /// 读取缓存的原始热度，不检查可用性
        pub fn peek_raw_score(&self, post_id: PostId) -> Option<i64> {
            let now = Instant::now();
            self.with_state(|state| {
                state.expire(now);
                state.raw_scores.get(&post_id).map(|(raw, _)| *raw)
            })
        }

        /// 当前索引中的复合分数，不检查可用性
        pub fn peek_composite(&self, post_id: PostId) -> Option<f64> {
            let now = Instant::now();
            self.with_state(|state| {
                state.expire(now);
                state.index.get(&post_id).copied()
            })
        }

        fn ensure_available(&self) -> Result<(), ScoreStoreError> {
            if self.available.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ScoreStoreError::unavailable("memory score store switched off"))
            }
        }

        fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
            let mut guard = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut guard)
        }

        fn live_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T, ScoreStoreError> {
            self.ensure_available()?;
            let now = Instant::now();
            Ok(self.with_state(|state| {
                state.expire(now);
                f(state)
            }))
        }
    }

    #[async_trait]
    impl ScoreStore for MemoryScoreStore {
        async fn index_len(&self) -> Result<usize, ScoreStoreError> {
            self.live_state(|state| state.index.len())
        }

        async fn range_desc(
            &self,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<PostId>, ScoreStoreError> {
            self.live_state(|state| {
                let mut members: Vec<(PostId, f64)> =
                    state.index.iter().map(|(id, score)| (*id, *score)).collect();
                // 与 ZREVRANGE 一致：分数降序，同分按成员降序
                members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
                members
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(|(id, _)| id)
                    .collect()
            })
        }

        async fn cached_raw_scores(
            &self,
            post_ids: &[PostId],
        ) -> Result<Vec<Option<i64>>, ScoreStoreError> {
            self.live_state(|state| {
                post_ids
                    .iter()
                    .map(|id| state.raw_scores.get(id).map(|(raw, _)| *raw))
                    .collect()
            })
        }

        async fn rebuild(
            &self,
            entries: &[ScoreEntry],
            recomputed: &[ScoreEntry],
        ) -> Result<(), ScoreStoreError> {
            let expires_at = Instant::now() + self.ttl;
            self.live_state(|state| {
                for entry in recomputed {
                    state
                        .raw_scores
                        .insert(entry.post_id, (entry.raw_score, expires_at));
                }
                state.index = entries
                    .iter()
                    .map(|entry| (entry.post_id, entry.composite()))
                    .collect();
                state.index_expires_at = (!state.index.is_empty()).then_some(expires_at);
            })?;
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn upsert(&self, entry: &ScoreEntry) -> Result<(), ScoreStoreError> {
            let expires_at = Instant::now() + self.ttl;
            self.live_state(|state| {
                state
                    .raw_scores
                    .insert(entry.post_id, (entry.raw_score, expires_at));
                if !state.index.is_empty() {
                    state.index.insert(entry.post_id, entry.composite());
                }
            })
        }

        async fn remove(&self, post_id: PostId) -> Result<(), ScoreStoreError> {
            self.live_state(|state| {
                state.index.remove(&post_id);
                state.raw_scores.remove(&post_id);
                if state.index.is_empty() {
                    state.index_expires_at = None;
                }
            })
        }

        async fn invalidate(&self) -> Result<(), ScoreStoreError> {
            self.live_state(|state| {
                state.index.clear();
                state.index_expires_at = None;
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::{TimeZone, Utc};
        use uuid::Uuid;

        fn entry(raw: i64, second: u32) -> ScoreEntry {
            let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, second).unwrap();
            ScoreEntry::new(PostId::from(Uuid::new_v4()), raw, created_at)
        }

        #[tokio::test]
        async fn range_is_descending_by_composite() {
            let store = MemoryScoreStore::new(Duration::from_secs(60));
            let low = entry(1, 0);
            let high = entry(9, 0);
            let newer_low = entry(1, 30);

            store
                .rebuild(&[low, high, newer_low], &[low, high, newer_low])
                .await
                .unwrap();

            assert_eq!(store.index_len().await.unwrap(), 3);
            assert_eq!(
                store.range_desc(0, 10).await.unwrap(),
                vec![high.post_id, newer_low.post_id, low.post_id]
            );
            assert_eq!(store.range_desc(1, 1).await.unwrap(), vec![newer_low.post_id]);
            assert!(store.range_desc(3, 1).await.unwrap().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn index_and_raw_scores_expire_after_ttl() {
            let store = MemoryScoreStore::new(Duration::from_secs(60));
            let e = entry(4, 0);
            store.rebuild(&[e], &[e]).await.unwrap();

            tokio::time::advance(Duration::from_secs(59)).await;
            assert_eq!(store.index_len().await.unwrap(), 1);
            assert_eq!(store.peek_raw_score(e.post_id), Some(4));

            tokio::time::advance(Duration::from_secs(2)).await;
            assert_eq!(store.index_len().await.unwrap(), 0);
            assert_eq!(store.peek_raw_score(e.post_id), None);
        }

        #[tokio::test]
        async fn upsert_into_cold_index_only_caches_raw_score() {
            let store = MemoryScoreStore::new(Duration::from_secs(60));
            let e = entry(6, 0);

            store.upsert(&e).await.unwrap();
            assert_eq!(store.index_len().await.unwrap(), 0);
            assert_eq!(store.cached_raw_scores(&[e.post_id]).await.unwrap(), vec![Some(6)]);
        }

        #[tokio::test]
        async fn switched_off_store_reports_unavailable() {
            let store = MemoryScoreStore::new(Duration::from_secs(60));
            store.set_available(false);
            assert!(matches!(
                store.index_len().await,
                Err(ScoreStoreError::Unavailable(_))
            ));
        }
    }
}
