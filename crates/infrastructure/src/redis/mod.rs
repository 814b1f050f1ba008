//! Redis 适配器
//!
//! 热度排行使用 Redis 有序集合作为共享缓存，多实例部署时所有实例读写同一份索引。

pub mod score_store;

pub use score_store::RedisScoreStore;
