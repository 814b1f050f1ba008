//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，内层定义接口，外层实现接口。

pub mod post_repository;

use futures_util::future::BoxFuture;

use crate::errors::RepositoryError;

pub use post_repository::PostRepository;

#[cfg(feature = "testing")]
pub use post_repository::MockPostRepository;

pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;
