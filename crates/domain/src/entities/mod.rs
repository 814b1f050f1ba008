//! 领域实体定义

pub mod post;

pub use post::{EngagementCounts, Post};
