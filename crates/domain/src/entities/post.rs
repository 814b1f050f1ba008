//! 帖子实体
//!
//! 只包含排序与推送所需的字段，完整的帖子 CRUD 由外部服务负责。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{GroupId, PostId, Timestamp, UserId};

/// 帖子实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    /// 群组帖子不参与全局热度排行
    pub group_id: Option<GroupId>,
    pub content: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub is_pinned: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Post {
    /// 创建新帖子，正文和图片至少要有一个
    pub fn new(
        author_id: UserId,
        content: Option<String>,
        image_urls: Vec<String>,
        group_id: Option<GroupId>,
    ) -> DomainResult<Self> {
        let content = content.filter(|text| !text.trim().is_empty());
        if content.is_none() && image_urls.is_empty() {
            return Err(DomainError::validation_error(
                "content",
                "post must have either content or image URLs",
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: PostId::from(Uuid::new_v4()),
            author_id,
            group_id,
            content,
            image_urls,
            is_pinned: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// 是否参与全局热度排行
    pub fn is_rankable(&self) -> bool {
        self.group_id.is_none()
    }
}

/// 帖子的互动计数（点赞、评论、浏览）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes: i64,
    pub comments: i64,
    pub views: i64,
}

impl EngagementCounts {
    pub fn new(likes: i64, comments: i64, views: i64) -> Self {
        Self {
            likes,
            comments,
            views,
        }
    }
}
