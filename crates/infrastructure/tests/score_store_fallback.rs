use application::{ScoreStore, ScoreStoreError};
use config::{EngagementConfig, RedisConfig};
use infrastructure::connect_score_store;

fn unreachable_redis(url: &str) -> RedisConfig {
    RedisConfig {
        url: url.to_string(),
        connect_attempts: 2,
        connect_timeout_secs: 1,
    }
}

#[tokio::test]
async fn unreachable_redis_disables_the_cache_instead_of_failing() {
    let store = connect_score_store(
        &unreachable_redis("redis://127.0.0.1:1"),
        &EngagementConfig::default(),
    )
    .await;

    assert!(matches!(
        store.index_len().await,
        Err(ScoreStoreError::Unavailable(_))
    ));
    assert!(matches!(
        store.range_desc(0, 20).await,
        Err(ScoreStoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn malformed_redis_url_disables_the_cache() {
    let store = connect_score_store(
        &unreachable_redis("not-a-redis-url"),
        &EngagementConfig::default(),
    )
    .await;

    assert!(matches!(store.invalidate().await, Err(ScoreStoreError::Unavailable(_))));
}
