//! 热度排行引擎
//!
//! 读路径优先使用排行缓存；索引为空时从帖子存储整体重建；
//! 缓存后端不可用时退化为内存排序，排序规则与缓存路径一致。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    rank_order, raw_score, slice_window, EngagementCounts, Post, PostId, PostRepository,
    ScoreEntry,
};

use crate::error::ApplicationResult;
use crate::score_store::{ScoreStore, ScoreStoreError};

/// 互动写入路径（点赞、评论、浏览、发帖、删帖）调用的重算入口
#[async_trait]
pub trait Rescorer: Send + Sync {
    /// 重新计算帖子的热度并写回缓存
    async fn update_score(&self, post_id: PostId) -> ApplicationResult<()>;

    /// 新帖以 0 分进入排行
    async fn track_new_post(&self, post_id: PostId) -> ApplicationResult<()>;

    /// 删帖后移出排行
    async fn remove_post(&self, post_id: PostId) -> ApplicationResult<()>;
}

pub struct EngagementRanker {
    posts: Arc<dyn PostRepository>,
    store: Arc<dyn ScoreStore>,
}

impl EngagementRanker {
    pub fn new(posts: Arc<dyn PostRepository>, store: Arc<dyn ScoreStore>) -> Self {
        Self { posts, store }
    }

    /// 按热度降序返回 `[offset, offset + limit)` 窗口内的帖子ID
    pub async fn ranked_ids(&self, limit: usize, offset: usize) -> ApplicationResult<Vec<PostId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        match self.store.index_len().await {
            Ok(0) => self.rebuild_and_read(limit, offset).await,
            Ok(_) => match self.store.range_desc(offset, limit).await {
                Ok(ids) => Ok(ids),
                Err(err) => {
                    self.log_degraded(&err);
                    let posts = self.posts.list_rankable().await?;
                    self.rank_in_memory(posts, limit, offset).await
                }
            },
            Err(err) => {
                self.log_degraded(&err);
                let posts = self.posts.list_rankable().await?;
                self.rank_in_memory(posts, limit, offset).await
            }
        }
    }

    /// 索引为空：复用缓存的原始热度，缺失的从计数重算，整体写回后再读取窗口
    async fn rebuild_and_read(&self, limit: usize, offset: usize) -> ApplicationResult<Vec<PostId>> {
        let posts = self.posts.list_rankable().await?;
        let ids: Vec<PostId> = posts.iter().map(|post| post.id).collect();

        let cached = match self.store.cached_raw_scores(&ids).await {
            Ok(cached) if cached.len() == ids.len() => cached,
            Ok(cached) => {
                self.log_degraded(&ScoreStoreError::Malformed(format!(
                    "expected {} cached scores, got {}",
                    ids.len(),
                    cached.len()
                )));
                return self.rank_in_memory(posts, limit, offset).await;
            }
            Err(err) => {
                self.log_degraded(&err);
                return self.rank_in_memory(posts, limit, offset).await;
            }
        };

        let mut entries = Vec::with_capacity(posts.len());
        let mut recomputed = Vec::new();
        for (post, cached) in posts.iter().zip(cached) {
            match cached {
                Some(raw) => entries.push(ScoreEntry::new(post.id, raw, post.created_at)),
                None => {
                    let counts = self.posts.engagement_counts(post.id).await?;
                    let entry = ScoreEntry::for_post(post, counts);
                    recomputed.push(entry);
                    entries.push(entry);
                }
            }
        }

        if let Err(err) = self.store.rebuild(&entries, &recomputed).await {
            self.log_degraded(&err);
            return self.rank_in_memory(posts, limit, offset).await;
        }

        tracing::info!(
            posts = entries.len(),
            recomputed = recomputed.len(),
            "热度排行索引已重建"
        );

        match self.store.range_desc(offset, limit).await {
            Ok(ids) => Ok(ids),
            Err(err) => {
                self.log_degraded(&err);
                self.rank_in_memory(posts, limit, offset).await
            }
        }
    }

    /// 降级路径：全部从权威计数重算后在内存中排序
    async fn rank_in_memory(
        &self,
        posts: Vec<Post>,
        limit: usize,
        offset: usize,
    ) -> ApplicationResult<Vec<PostId>> {
        let mut entries = Vec::with_capacity(posts.len());
        for post in &posts {
            let counts = self.posts.engagement_counts(post.id).await?;
            entries.push(ScoreEntry::for_post(post, counts));
        }
        entries.sort_by(rank_order);

        Ok(slice_window(entries, offset, limit)
            .into_iter()
            .map(|entry| entry.post_id)
            .collect())
    }

    fn log_degraded(&self, err: &ScoreStoreError) {
        tracing::warn!(error = %err, "排行缓存不可用，降级为内存排序");
    }

    /// 重算单个帖子，返回写入的条目；帖子不存在时移出排行并返回 `None`
    pub async fn rescore(&self, post_id: PostId) -> ApplicationResult<Option<ScoreEntry>> {
        let Some(post) = self.posts.find_by_id(post_id).await? else {
            tracing::debug!(post_id = %post_id, "帖子不存在，移出排行");
            self.remove_quietly(post_id).await;
            return Ok(None);
        };
        if !post.is_rankable() {
            return Ok(None);
        }

        let counts = self.posts.engagement_counts(post_id).await?;
        let entry = ScoreEntry::for_post(&post, counts);
        if let Err(err) = self.store.upsert(&entry).await {
            tracing::warn!(post_id = %post_id, error = %err, "写入帖子热度失败");
        }
        tracing::debug!(post_id = %post_id, score = entry.raw_score, "帖子热度已更新");
        Ok(Some(entry))
    }

    /// 丢弃整个索引，下一次读取重建
    pub async fn invalidate(&self) {
        match self.store.invalidate().await {
            Ok(()) => tracing::info!("热度排行索引已清空"),
            Err(err) => tracing::warn!(error = %err, "清空热度排行索引失败"),
        }
    }

    async fn remove_quietly(&self, post_id: PostId) {
        if let Err(err) = self.store.remove(post_id).await {
            tracing::warn!(post_id = %post_id, error = %err, "移除帖子热度失败");
        }
    }
}

#[async_trait]
impl Rescorer for EngagementRanker {
    async fn update_score(&self, post_id: PostId) -> ApplicationResult<()> {
        self.rescore(post_id).await.map(|_| ())
    }

    async fn track_new_post(&self, post_id: PostId) -> ApplicationResult<()> {
        let Some(post) = self.posts.find_by_id(post_id).await? else {
            return Ok(());
        };
        if !post.is_rankable() {
            return Ok(());
        }

        let entry = ScoreEntry::new(post.id, raw_score(EngagementCounts::default()), post.created_at);
        if let Err(err) = self.store.upsert(&entry).await {
            tracing::warn!(post_id = %post_id, error = %err, "新帖加入排行失败");
        }
        Ok(())
    }

    async fn remove_post(&self, post_id: PostId) -> ApplicationResult<()> {
        self.remove_quietly(post_id).await;
        Ok(())
    }
}
