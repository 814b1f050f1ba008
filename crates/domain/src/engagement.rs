//! 帖子热度计算规则
//!
//! 热度 = 点赞 × 2 + 评论 × 3 + 浏览 × 1。
//! 写入有序集合时使用复合分数 `raw_score * RANK_SCALE + tie_break`，
//! 其中 `tie_break` 由创建时间归一化得到，保证同分时较新的帖子排在前面。
//! 缓存路径与降级（内存排序）路径必须共用这里的规则。

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entities::{EngagementCounts, Post};
use crate::value_objects::{PostId, Timestamp};

pub const LIKE_WEIGHT: i64 = 2;
pub const COMMENT_WEIGHT: i64 = 3;
pub const VIEW_WEIGHT: i64 = 1;

/// 复合分数中原始热度的放大倍数。
///
/// `tie_break` 恒小于该值，因此任何 ≥1 的热度差都不会被时间因子反转。
pub const RANK_SCALE: f64 = 1_000_000.0;

/// 按权重计算原始热度
pub fn raw_score(counts: EngagementCounts) -> i64 {
    counts.likes * LIKE_WEIGHT + counts.comments * COMMENT_WEIGHT + counts.views * VIEW_WEIGHT
}

/// 将创建时间映射为 `[0, RANK_SCALE)` 内单调递增的小数
pub fn tie_break(created_at: Timestamp) -> f64 {
    let seconds = created_at.timestamp().max(0) as f64;
    seconds / RANK_SCALE
}

/// 有序集合中使用的复合分数
pub fn composite_score(raw_score: i64, created_at: Timestamp) -> f64 {
    raw_score as f64 * RANK_SCALE + tie_break(created_at)
}

/// 一条热度记录
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub post_id: PostId,
    pub raw_score: i64,
    pub created_at: Timestamp,
}

impl ScoreEntry {
    pub fn new(post_id: PostId, raw_score: i64, created_at: Timestamp) -> Self {
        Self {
            post_id,
            raw_score,
            created_at,
        }
    }

    pub fn for_post(post: &Post, counts: EngagementCounts) -> Self {
        Self::new(post.id, raw_score(counts), post.created_at)
    }

    pub fn composite(&self) -> f64 {
        composite_score(self.raw_score, self.created_at)
    }
}

/// 排行顺序：热度降序，同分按创建秒数降序，再按 ID 降序。
///
/// 复合分数只精确到秒，同一秒内创建的帖子在有序集合里按成员倒序排列，
/// 这里保持同样的顺序。
pub fn rank_order(a: &ScoreEntry, b: &ScoreEntry) -> Ordering {
    b.raw_score
        .cmp(&a.raw_score)
        .then_with(|| b.created_at.timestamp().cmp(&a.created_at.timestamp()))
        .then_with(|| b.post_id.cmp(&a.post_id))
}

/// 截取 `[offset, offset + limit)` 窗口，越界时返回空
pub fn slice_window<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    if offset >= items.len() || limit == 0 {
        return Vec::new();
    }
    items.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn entry(raw: i64, created_at: Timestamp) -> ScoreEntry {
        ScoreEntry::new(PostId::from(Uuid::new_v4()), raw, created_at)
    }

    #[test]
    fn raw_score_uses_fixed_weights() {
        for (likes, comments, views) in [(0, 0, 0), (3, 1, 0), (7, 2, 40), (1, 0, 1000)] {
            let counts = EngagementCounts::new(likes, comments, views);
            assert_eq!(raw_score(counts), likes * 2 + comments * 3 + views);
        }
    }

    #[test]
    fn newer_post_wins_on_equal_raw_score() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = older + Duration::seconds(1);

        assert!(composite_score(5, newer) > composite_score(5, older));
        assert_eq!(rank_order(&entry(5, newer), &entry(5, older)), Ordering::Less);
    }

    #[test]
    fn tie_break_never_inverts_raw_score() {
        let ancient = Utc.timestamp_opt(0, 0).unwrap();
        let far_future = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();

        assert!(tie_break(far_future) < RANK_SCALE);
        assert!(composite_score(1, ancient) > composite_score(0, far_future));
    }

    #[test]
    fn cached_and_fallback_orders_agree() {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut entries = vec![
            entry(9, base),
            entry(3, base + Duration::seconds(30)),
            entry(9, base + Duration::seconds(5)),
            entry(0, base + Duration::seconds(90)),
        ];

        let mut by_composite = entries.clone();
        by_composite.sort_by(|a, b| b.composite().total_cmp(&a.composite()));
        entries.sort_by(rank_order);

        let left: Vec<_> = entries.iter().map(|e| e.post_id).collect();
        let right: Vec<_> = by_composite.iter().map(|e| e.post_id).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn same_second_ties_fall_back_to_descending_id() {
        let second = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let early = entry(4, second + Duration::milliseconds(100));
        let late = entry(4, second + Duration::milliseconds(900));
        assert_eq!(early.composite(), late.composite());

        let (high_id, low_id) = if early.post_id > late.post_id {
            (early, late)
        } else {
            (late, early)
        };
        let mut entries = vec![low_id, high_id];
        entries.sort_by(rank_order);
        assert_eq!(
            entries.iter().map(|e| e.post_id).collect::<Vec<_>>(),
            vec![high_id.post_id, low_id.post_id]
        );
    }

    #[test]
    fn slice_window_handles_bounds() {
        let items: Vec<u32> = (0..5).collect();
        assert_eq!(slice_window(items.clone(), 0, 2), vec![0, 1]);
        assert_eq!(slice_window(items.clone(), 4, 10), vec![4]);
        assert!(slice_window(items.clone(), 5, 2).is_empty());
        assert!(slice_window(items, 1, 0).is_empty());
    }
}
