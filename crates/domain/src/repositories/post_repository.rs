//! 帖子Repository接口定义
//!
//! 帖子与互动计数的权威数据源由外部存储提供，这里只定义排行与组装所需的只读查询。

use crate::entities::{EngagementCounts, Post};
use crate::repositories::RepositoryFuture;
use crate::value_objects::PostId;

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait PostRepository: Send + Sync {
    /// 根据ID查找未删除的帖子
    fn find_by_id(&self, id: PostId) -> RepositoryFuture<Option<Post>>;

    /// 批量加载帖子，返回顺序不做保证，缺失的ID直接跳过
    fn find_by_ids(&self, ids: Vec<PostId>) -> RepositoryFuture<Vec<Post>>;

    /// 所有参与全局排行的帖子（非群组、未删除）
    fn list_rankable(&self) -> RepositoryFuture<Vec<Post>>;

    /// 帖子当前的点赞/评论/浏览计数
    fn engagement_counts(&self, id: PostId) -> RepositoryFuture<EngagementCounts>;
}
