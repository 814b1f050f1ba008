//! 实时推送事件
//!
//! 出站消息固定为 `{type, payload}` 外壳，`payload` 的结构由 `type` 决定；
//! 未知的 `type` 会被保留为 [`ServerEvent::Other`]，而不是解析失败。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::value_objects::UserId;

pub const NOTIFICATION_TYPE: &str = "notification";
pub const BROADCAST_TYPE: &str = "broadcast";
pub const USER_PRESENCE_TYPE: &str = "user_presence";
pub const PONG_TYPE: &str = "pong";

/// 用户上下线事件载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub online: bool,
}

/// 心跳应答载荷，携带服务器当前 Unix 时间（秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: i64,
}

impl Pong {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub enum ServerEvent {
    /// 定向通知（点对点）
    Notification(Value),
    /// 全员广播
    Broadcast(Value),
    /// 用户上下线
    UserPresence(PresenceChange),
    /// 心跳应答
    Pong(Pong),
    /// 未识别的事件类型，原样保留
    Other { kind: String, payload: Value },
}

impl ServerEvent {
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::Notification(_) => NOTIFICATION_TYPE,
            ServerEvent::Broadcast(_) => BROADCAST_TYPE,
            ServerEvent::UserPresence(_) => USER_PRESENCE_TYPE,
            ServerEvent::Pong(_) => PONG_TYPE,
            ServerEvent::Other { kind, .. } => kind,
        }
    }

    pub fn presence(user_id: UserId, online: bool) -> Self {
        ServerEvent::UserPresence(PresenceChange { user_id, online })
    }
}

/// 线上传输的原始外壳
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl TryFrom<RawEvent> for ServerEvent {
    type Error = serde_json::Error;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let event = match raw.kind.as_str() {
            NOTIFICATION_TYPE => ServerEvent::Notification(raw.payload),
            BROADCAST_TYPE => ServerEvent::Broadcast(raw.payload),
            USER_PRESENCE_TYPE => ServerEvent::UserPresence(serde_json::from_value(raw.payload)?),
            PONG_TYPE => ServerEvent::Pong(serde_json::from_value(raw.payload)?),
            _ => ServerEvent::Other {
                kind: raw.kind,
                payload: raw.payload,
            },
        };
        Ok(event)
    }
}

impl From<ServerEvent> for RawEvent {
    fn from(event: ServerEvent) -> Self {
        let kind = event.kind().to_owned();
        let payload = match event {
            ServerEvent::Notification(payload) | ServerEvent::Broadcast(payload) => payload,
            ServerEvent::UserPresence(change) => json_value(&change),
            ServerEvent::Pong(pong) => json_value(&pong),
            ServerEvent::Other { payload, .. } => payload,
        };
        RawEvent { kind, payload }
    }
}

fn json_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// 投递信封：`target` 为空表示发给所有在线会话
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub target: Option<UserId>,
    pub event: ServerEvent,
}

impl Envelope {
    /// 发给指定用户的通知
    pub fn to_user(user_id: UserId, payload: Value) -> Self {
        Self {
            target: Some(user_id),
            event: ServerEvent::Notification(payload),
        }
    }

    /// 全员广播
    pub fn broadcast(payload: Value) -> Self {
        Self {
            target: None,
            event: ServerEvent::Broadcast(payload),
        }
    }

    /// 全员可见的上下线事件
    pub fn presence(user_id: UserId, online: bool) -> Self {
        Self {
            target: None,
            event: ServerEvent::presence(user_id, online),
        }
    }
}

/// 客户端发来的控制帧
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 应用层心跳，服务器回复 pong
    Ping,
    /// 通知已读回执，不需要回复
    ReadReceipt {
        #[serde(default)]
        notification_id: Option<Uuid>,
    },
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// 解析客户端文本帧，格式错误返回 `None`
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
