//! 连接上收发的事件协议
//!
//! 字段名是对外的线协议，序列化为带 `type` 标签的 JSON 对象。

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryStatus;
use crate::identity::UserProfile;
use crate::message::HistoryEntry;
use crate::value_objects::{AvatarUrl, MessageId, Timestamp, Username};

/// 在线列表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub username: Username,
    pub avatar: AvatarUrl,
    pub bio: String,
}

impl From<&UserProfile> for OnlineUser {
    fn from(profile: &UserProfile) -> Self {
        Self {
            username: profile.username.clone(),
            avatar: profile.avatar.clone(),
            bio: profile.bio_excerpt(),
        }
    }
}

/// 服务端推送给连接的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 加入时推送的历史消息，每条一个事件
    OldMessage {
        id: MessageId,
        message: String,
        username: Username,
        avatar: AvatarUrl,
        timestamp: Timestamp,
    },
    ChatMessage {
        id: MessageId,
        message: String,
        username: Username,
        avatar: AvatarUrl,
        timestamp: Timestamp,
        /// 按接收连接计算，同一用户的两个标签页互不相同
        is_current_user: bool,
    },
    UserJoined {
        username: Username,
        avatar: AvatarUrl,
    },
    UserLeft {
        username: Username,
    },
    OnlineUsers {
        online_users: Vec<OnlineUser>,
    },
    MessageStatusUpdate {
        message_id: MessageId,
        status: DeliveryStatus,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::OldMessage { .. } => "old_message",
            ServerEvent::ChatMessage { .. } => "chat_message",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::OnlineUsers { .. } => "online_users",
            ServerEvent::MessageStatusUpdate { .. } => "message_status_update",
        }
    }
}

impl From<HistoryEntry> for ServerEvent {
    fn from(entry: HistoryEntry) -> Self {
        ServerEvent::OldMessage {
            id: entry.id,
            message: entry.content,
            username: entry.username,
            avatar: entry.avatar,
            timestamp: entry.timestamp,
        }
    }
}

/// 客户端发来的帧，只接受 `{"message": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientFrame {
    pub message: String,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
