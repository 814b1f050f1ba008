/// 内存实现的帖子仓储（用于测试）
pub mod memory {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use domain::{
        EngagementCounts, Post, PostId, PostRepository, RepositoryError, RepositoryFuture,
    };
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct State {
        posts: HashMap<PostId, Post>,
        counts: HashMap<PostId, EngagementCounts>,
        deleted: HashSet<PostId>,
    }

    #[derive(Clone, Default)]
    pub struct MemoryPostRepository {
        state: Arc<RwLock<State>>,
        failing: Arc<AtomicBool>,
        count_queries: Arc<AtomicUsize>,
    }

    impl MemoryPostRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, post: Post) {
            self.state.write().await.posts.insert(post.id, post);
        }

        pub async fn set_counts(&self, post_id: PostId, counts: EngagementCounts) {
            self.state.write().await.counts.insert(post_id, counts);
        }

        /// 软删除：帖子不再出现在任何查询结果中
        pub async fn delete(&self, post_id: PostId) {
            self.state.write().await.deleted.insert(post_id);
        }

        /// 让后续所有查询返回存储错误
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// `engagement_counts` 被调用的次数
        pub fn count_queries(&self) -> usize {
            self.count_queries.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RepositoryError::storage("memory repository switched off"))
            } else {
                Ok(())
            }
        }
    }

    impl State {
        fn live(&self, post_id: &PostId) -> Option<&Post> {
            if self.deleted.contains(post_id) {
                return None;
            }
            self.posts.get(post_id)
        }
    }

    impl PostRepository for MemoryPostRepository {
        fn find_by_id(&self, id: PostId) -> RepositoryFuture<Option<Post>> {
            let state = self.state.clone();
            let check = self.check();
            Box::pin(async move {
                check?;
                Ok(state.read().await.live(&id).cloned())
            })
        }

        fn find_by_ids(&self, ids: Vec<PostId>) -> RepositoryFuture<Vec<Post>> {
            let state = self.state.clone();
            let check = self.check();
            Box::pin(async move {
                check?;
                let guard = state.read().await;
                let unique: HashSet<PostId> = ids.into_iter().collect();
                Ok(unique
                    .iter()
                    .filter_map(|id| guard.live(id))
                    .filter(|post| post.is_rankable())
                    .cloned()
                    .collect())
            })
        }

        fn list_rankable(&self) -> RepositoryFuture<Vec<Post>> {
            let state = self.state.clone();
            let check = self.check();
            Box::pin(async move {
                check?;
                let guard = state.read().await;
                Ok(guard
                    .posts
                    .keys()
                    .filter_map(|id| guard.live(id))
                    .filter(|post| post.is_rankable())
                    .cloned()
                    .collect())
            })
        }

        fn engagement_counts(&self, post_id: PostId) -> RepositoryFuture<EngagementCounts> {
            let state = self.state.clone();
            let check = self.check();
            self.count_queries.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                check?;
                let guard = state.read().await;
                Ok(guard.counts.get(&post_id).copied().unwrap_or_default())
            })
        }
    }
}
