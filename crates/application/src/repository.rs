//! 核心依赖的外部协作方
//!
//! 房间、消息和用户资料的持久化由其他模块负责，这里只定义核心消费的接口。

use async_trait::async_trait;
use domain::{
    AvatarUrl, HistoryEntry, MessageContent, RepositoryError, Room, RoomName, StoredMessage,
    UserProfile, Username,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 保存消息并返回权威的 id 与时间戳。房间不存在时返回 `RepositoryError::NotFound`。
    async fn append_message(
        &self,
        room: &RoomName,
        username: &Username,
        content: &MessageContent,
    ) -> Result<StoredMessage, RepositoryError>;

    /// 房间最近的 `limit` 条消息，按时间从旧到新排列
    async fn fetch_recent(
        &self,
        room: &RoomName,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// 用户头像，未设置或用户不存在时返回默认头像
    async fn resolve_avatar(&self, username: &Username) -> Result<AvatarUrl, RepositoryError>;

    /// 批量解析用户资料，未知用户不出现在结果中
    async fn batch_resolve(
        &self,
        usernames: &[Username],
    ) -> Result<Vec<UserProfile>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError>;
}
