use crate::value_objects::{AvatarUrl, MessageContent, MessageId, RoomName, Timestamp, Username};

/// 连接建立时推送的历史消息条数上限
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// 已持久化的消息，创建后不可修改。
///
/// 房间内按 `(created_at, id)` 全序排列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room: RoomName,
    pub author: Username,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

impl Message {
    pub fn stored(&self) -> StoredMessage {
        StoredMessage {
            id: self.id,
            created_at: self.created_at,
        }
    }
}

/// 持久化层在保存时分配的权威 id 与时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub created_at: Timestamp,
}

/// 历史消息读取结果，附带作者当前头像
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HistoryEntry {
    pub id: MessageId,
    pub content: String,
    pub username: Username,
    pub avatar: AvatarUrl,
    pub timestamp: Timestamp,
}
