//! 基础设施层实现。
//!
//! 提供 PostgreSQL 帖子仓储与 Redis 热度排行缓存，实现应用/领域层定义的接口。

pub mod builder;
pub mod redis;
pub mod repository;

pub use builder::{connect_score_store, Infrastructure, InfrastructureError, MIGRATOR};
pub use self::redis::RedisScoreStore;
pub use repository::{create_pg_pool, PgPostRepository};
