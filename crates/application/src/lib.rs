//! 应用层实现。
//!
//! 这里提供实时推送中心（连接注册、在线状态、定向/全员推送）
//! 与热度排行引擎（有序集合缓存 + 内存降级）两个核心用例，
//! 以及对外部适配器（排行缓存、帖子存储）的抽象。

pub mod error;
pub mod feed;
pub mod hub;
pub mod presence;
pub mod ranking;
pub mod repository;
pub mod score_store;

pub use error::{ApplicationError, ApplicationResult};
pub use feed::{FeedAssembler, FeedService};
pub use hub::{
    ConnectionHub, HubConfig, HubHandle, HubStats, OutboundEvent, SessionHandle, SessionQueue,
    SessionReplier,
};
pub use presence::{LoggingPresenceObserver, PresenceDirectory, PresenceObserver};
pub use ranking::{EngagementRanker, Rescorer};
pub use score_store::{DisabledScoreStore, ScoreStore, ScoreStoreError};
