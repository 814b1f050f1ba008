//! 社交动态系统核心领域模型
//!
//! 包含帖子、互动计数、实时推送事件等核心类型，以及热度排序规则。

pub mod engagement;
pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use engagement::*;
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use value_objects::*;
