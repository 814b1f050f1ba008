//! 领域事件定义
//!
//! 包含实时推送通道上使用的所有事件类型

pub mod realtime_event;

pub use realtime_event::{ClientFrame, Envelope, PresenceChange, Pong, RawEvent, ServerEvent};
