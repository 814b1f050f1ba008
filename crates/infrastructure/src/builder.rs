use std::sync::Arc;
use std::time::Duration;

use application::{DisabledScoreStore, ScoreStore};
use config::{EngagementConfig, RedisConfig};
use domain::PostRepository;
use sqlx::migrate::Migrator;
use thiserror::Error;

use crate::{
    redis::RedisScoreStore,
    repository::{create_pg_pool, PgPostRepository},
};

/// 帖子相关表的建表脚本（仅在表不存在时创建）
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 外部适配器集合
#[derive(Clone)]
pub struct Infrastructure {
    pub posts: Arc<PgPostRepository>,
    pub score_store: Arc<dyn ScoreStore>,
}

impl Infrastructure {
    /// 数据库不可用时启动失败；Redis 不可用只会禁用排行缓存。
    pub async fn connect(config: &config::AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库连接成功");

        let score_store = connect_score_store(&config.redis, &config.engagement).await;

        Ok(Self {
            posts: Arc::new(PgPostRepository::new(pool)),
            score_store,
        })
    }

    pub fn post_repository(&self) -> Arc<dyn PostRepository> {
        self.posts.clone()
    }

    pub fn score_store(&self) -> Arc<dyn ScoreStore> {
        self.score_store.clone()
    }
}

/// 连接 Redis 排行缓存，失败时按指数退避重试。
///
/// 所有尝试都失败后返回 [`DisabledScoreStore`]，排行读取随之降级为内存排序。
pub async fn connect_score_store(
    redis: &RedisConfig,
    engagement: &EngagementConfig,
) -> Arc<dyn ScoreStore> {
    let attempts = redis.connect_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(
            redis.connect_timeout(),
            RedisScoreStore::connect(&redis.url, engagement),
        )
        .await
        {
            Ok(Ok(store)) => {
                tracing::info!(url = %redis.url, attempt, "Redis 连接成功");
                return Arc::new(store);
            }
            Ok(Err(err)) => last_error = err.to_string(),
            Err(_) => {
                last_error = format!("connect timed out after {:?}", redis.connect_timeout())
            }
        }

        if attempt < attempts {
            let delay = retry_delay(attempt);
            tracing::warn!(
                url = %redis.url,
                attempt,
                attempts,
                error = %last_error,
                "Redis 连接失败，{:?} 后重试",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    tracing::warn!(
        url = %redis.url,
        attempts,
        error = %last_error,
        "Redis 不可用，热度排行缓存已禁用，排行降级为内存排序"
    );
    Arc::new(DisabledScoreStore::new(format!(
        "redis unavailable at startup: {last_error}"
    )))
}

/// 第 `attempt` 次失败后的等待时间：从 1 秒开始翻倍，最多 8 秒
fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    INITIAL_RETRY_DELAY.saturating_mul(factor).min(MAX_RETRY_DELAY)
}
