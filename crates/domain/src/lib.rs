//! 聊天室实时协调核心的领域模型
//!
//! 包含房间、消息、身份、投递状态等值对象与实体，
//! 以及服务端推送给连接的事件协议。

pub mod delivery;
pub mod errors;
pub mod events;
pub mod identity;
pub mod message;
pub mod room;
pub mod value_objects;

// 重新导出常用类型
pub use delivery::{DeliveryStatus, MessageDelivery};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::{ClientFrame, OnlineUser, ServerEvent};
pub use identity::{Principal, UserProfile, BIO_EXCERPT_CHARS};
pub use message::{HistoryEntry, Message, StoredMessage, DEFAULT_HISTORY_LIMIT};
pub use room::Room;
pub use value_objects::{
    AvatarUrl, ConnectionId, MessageContent, MessageId, RoomName, Timestamp, Username,
    DEFAULT_AVATAR,
};
