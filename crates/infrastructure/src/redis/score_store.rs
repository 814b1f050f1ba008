use std::time::Duration;

use application::{ScoreStore, ScoreStoreError};
use async_trait::async_trait;
use domain::{PostId, ScoreEntry};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

/// 只在索引存在时写入成员，避免重建前出现残缺索引
const ZADD_IF_INDEXED: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
end
return 0
"#;

fn map_redis_err(err: redis::RedisError) -> ScoreStoreError {
    ScoreStoreError::unavailable(format!("Redis operation failed: {err}"))
}

/// Redis 实现的热度排行缓存。
///
/// - 有序索引：`{index_key}`，成员为帖子ID，分数为复合分数
/// - 原始热度：`{score_key_prefix}{post_id}`，带过期时间
#[derive(Clone)]
pub struct RedisScoreStore {
    conn: ConnectionManager,
    index_key: String,
    score_key_prefix: String,
    ttl: Duration,
    zadd_if_indexed: Script,
}

impl RedisScoreStore {
    pub fn new(
        conn: ConnectionManager,
        index_key: impl Into<String>,
        score_key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            conn,
            index_key: index_key.into(),
            score_key_prefix: score_key_prefix.into(),
            ttl,
            zadd_if_indexed: Script::new(ZADD_IF_INDEXED),
        }
    }

    /// 按配置连接 Redis
    pub async fn connect(
        redis_url: &str,
        config: &config::EngagementConfig,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(
            conn,
            config.index_key.clone(),
            config.score_key_prefix.clone(),
            config.cache_ttl(),
        ))
    }

    /// 生成帖子原始热度缓存的键
    fn score_key(&self, post_id: PostId) -> String {
        format!("{}{}", self.score_key_prefix, post_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl ScoreStore for RedisScoreStore {
    async fn index_len(&self) -> Result<usize, ScoreStoreError> {
        let mut conn = self.conn.clone();
        conn.zcard(&self.index_key).await.map_err(map_redis_err)
    }

    async fn range_desc(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PostId>, ScoreStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;
        let members: Vec<String> = conn
            .zrevrange(&self.index_key, start, stop)
            .await
            .map_err(map_redis_err)?;

        members
            .into_iter()
            .map(|member| {
                member
                    .parse::<PostId>()
                    .map_err(|e| ScoreStoreError::Malformed(format!("{member}: {e}")))
            })
            .collect()
    }

    async fn cached_raw_scores(
        &self,
        post_ids: &[PostId],
    ) -> Result<Vec<Option<i64>>, ScoreStoreError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = post_ids.iter().map(|id| self.score_key(*id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        // 无法解析的缓存值按未命中处理，重建时会被覆盖
        Ok(values
            .into_iter()
            .map(|value| value.and_then(|raw| raw.parse::<i64>().ok()))
            .collect())
    }

    async fn rebuild(
        &self,
        entries: &[ScoreEntry],
        recomputed: &[ScoreEntry],
    ) -> Result<(), ScoreStoreError> {
        let mut conn = self.conn.clone();
        let ttl = self.ttl_secs();

        // 单次往返：旧索引删除、原始热度回写、新索引写入在同一个事务里
        let mut pipe = redis::pipe();
        pipe.atomic().del(&self.index_key).ignore();
        for entry in recomputed {
            pipe.set_ex(self.score_key(entry.post_id), entry.raw_score, ttl)
                .ignore();
        }
        if !entries.is_empty() {
            let members: Vec<(f64, String)> = entries
                .iter()
                .map(|entry| (entry.composite(), entry.post_id.to_string()))
                .collect();
            pipe.zadd_multiple(&self.index_key, &members)
                .ignore()
                .expire(&self.index_key, ttl as i64)
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn upsert(&self, entry: &ScoreEntry) -> Result<(), ScoreStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.score_key(entry.post_id), entry.raw_score, self.ttl_secs())
            .await
            .map_err(map_redis_err)?;

        let _: i64 = self
            .zadd_if_indexed
            .key(&self.index_key)
            .arg(entry.composite())
            .arg(entry.post_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn remove(&self, post_id: PostId) -> Result<(), ScoreStoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .zrem(&self.index_key, post_id.to_string())
            .ignore()
            .del(self.score_key(post_id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), ScoreStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.index_key).await.map_err(map_redis_err)?;
        Ok(())
    }
}
