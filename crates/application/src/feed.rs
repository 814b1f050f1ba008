use std::collections::HashMap;
use std::sync::Arc;

use domain::{Post, PostId, PostRepository};

use crate::error::ApplicationResult;
use crate::ranking::EngagementRanker;

/// 按排行窗口加载帖子并还原顺序
pub struct FeedAssembler {
    posts: Arc<dyn PostRepository>,
}

impl FeedAssembler {
    pub fn new(posts: Arc<dyn PostRepository>) -> Self {
        Self { posts }
    }

    /// 加载 `ids` 对应的帖子，结果顺序与 `ids` 一致，已删除或不存在的直接跳过
    pub async fn hydrate(&self, ids: &[PostId]) -> ApplicationResult<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = self.posts.find_by_ids(ids.to_vec()).await?;
        let mut by_id: HashMap<PostId, Post> = loaded
            .into_iter()
            .filter(Post::is_rankable)
            .map(|post| (post.id, post))
            .collect();

        let posts: Vec<Post> = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        if posts.len() < ids.len() {
            tracing::debug!(requested = ids.len(), found = posts.len(), "部分帖子已不存在");
        }
        Ok(posts)
    }
}

/// 热度动态流：排行 + 组装
pub struct FeedService {
    ranker: Arc<EngagementRanker>,
    assembler: FeedAssembler,
}

impl FeedService {
    pub fn new(ranker: Arc<EngagementRanker>, assembler: FeedAssembler) -> Self {
        Self { ranker, assembler }
    }

    pub fn ranker(&self) -> &Arc<EngagementRanker> {
        &self.ranker
    }

    pub async fn ranked_ids(&self, limit: usize, offset: usize) -> ApplicationResult<Vec<PostId>> {
        self.ranker.ranked_ids(limit, offset).await
    }

    pub async fn hydrate(&self, ids: &[PostId]) -> ApplicationResult<Vec<Post>> {
        self.assembler.hydrate(ids).await
    }

    /// 一页热度排行的帖子
    pub async fn ranked_feed(&self, limit: usize, offset: usize) -> ApplicationResult<Vec<Post>> {
        let ids = self.ranker.ranked_ids(limit, offset).await?;
        self.assembler.hydrate(&ids).await
    }
}
