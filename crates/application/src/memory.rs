//! 内存实现的协作方（用于开发和测试）
//!
//! 进程重启即丢失，行为与数据库实现保持一致：消息 id 单调递增，
//! 同一房间内的时间戳不回退，未知房间返回 `RepositoryError::NotFound`。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    AvatarUrl, HistoryEntry, Message, MessageContent, MessageId, RepositoryError, Room,
    RoomName, StoredMessage, Timestamp, UserProfile, Username,
};
use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::repository::{IdentityDirectory, MessageStore, RoomDirectory};
use crate::services::{ChatServiceDependencies, ChatSettings};

#[derive(Default)]
pub struct InMemoryRoomDirectory {
    rooms: RwLock<HashSet<RoomName>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: RoomName) {
        self.rooms.write().await.insert(name);
    }

    async fn contains(&self, name: &RoomName) -> bool {
        self.rooms.read().await.contains(name)
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError> {
        Ok(self
            .contains(name)
            .await
            .then(|| Room::new(name.clone())))
    }
}

pub struct InMemoryIdentityDirectory {
    default_avatar: AvatarUrl,
    profiles: RwLock<HashMap<Username, UserProfile>>,
}

impl Default for InMemoryIdentityDirectory {
    fn default() -> Self {
        Self::new(AvatarUrl::default_avatar())
    }
}

impl InMemoryIdentityDirectory {
    pub fn new(default_avatar: AvatarUrl) -> Self {
        Self {
            default_avatar,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.username.clone(), profile);
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn resolve_avatar(&self, username: &Username) -> Result<AvatarUrl, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .get(username)
            .map(|profile| profile.avatar.clone())
            .unwrap_or_else(|| self.default_avatar.clone()))
    }

    async fn batch_resolve(
        &self,
        usernames: &[Username],
    ) -> Result<Vec<UserProfile>, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(usernames
            .iter()
            .filter_map(|username| profiles.get(username).cloned())
            .collect())
    }
}

#[derive(Default)]
struct MessageLog {
    next_id: i64,
    last_created_at: Option<Timestamp>,
    messages: HashMap<RoomName, Vec<Message>>,
}

pub struct InMemoryMessageStore {
    rooms: Arc<InMemoryRoomDirectory>,
    identities: Arc<dyn IdentityDirectory>,
    clock: Arc<dyn Clock>,
    log: Mutex<MessageLog>,
}

impl InMemoryMessageStore {
    pub fn new(
        rooms: Arc<InMemoryRoomDirectory>,
        identities: Arc<dyn IdentityDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rooms,
            identities,
            clock,
            log: Mutex::new(MessageLog::default()),
        }
    }

    pub async fn message_count(&self, room: &RoomName) -> usize {
        let log = self.log.lock().await;
        log.messages.get(room).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append_message(
        &self,
        room: &RoomName,
        username: &Username,
        content: &MessageContent,
    ) -> Result<StoredMessage, RepositoryError> {
        if !self.rooms.contains(room).await {
            return Err(RepositoryError::NotFound);
        }

        let mut log = self.log.lock().await;
        log.next_id += 1;
        let id = MessageId::new(log.next_id);

        let now = self.clock.now();
        let created_at = match log.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        log.last_created_at = Some(created_at);

        let message = Message {
            id,
            room: room.clone(),
            author: username.clone(),
            content: content.clone(),
            created_at,
        };
        let stored = message.stored();
        log.messages.entry(room.clone()).or_default().push(message);

        Ok(stored)
    }

    async fn fetch_recent(
        &self,
        room: &RoomName,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        if !self.rooms.contains(room).await {
            return Err(RepositoryError::NotFound);
        }

        let recent: Vec<Message> = {
            let log = self.log.lock().await;
            let messages = log.messages.get(room).map(Vec::as_slice).unwrap_or(&[]);
            let start = messages.len().saturating_sub(limit);
            messages[start..].to_vec()
        };

        let mut entries = Vec::with_capacity(recent.len());
        for message in recent {
            let avatar = self.identities.resolve_avatar(&message.author).await?;
            entries.push(HistoryEntry {
                id: message.id,
                content: message.content.into_inner(),
                username: message.author,
                avatar,
                timestamp: message.created_at,
            });
        }
        Ok(entries)
    }
}

/// 一组共享状态的内存协作方
pub struct InMemoryCollaborators {
    pub rooms: Arc<InMemoryRoomDirectory>,
    pub identities: Arc<InMemoryIdentityDirectory>,
    pub messages: Arc<InMemoryMessageStore>,
    pub clock: Arc<dyn Clock>,
}

impl InMemoryCollaborators {
    pub fn new(clock: Arc<dyn Clock>, default_avatar: AvatarUrl) -> Self {
        let rooms = Arc::new(InMemoryRoomDirectory::new());
        let identities = Arc::new(InMemoryIdentityDirectory::new(default_avatar));
        let messages = Arc::new(InMemoryMessageStore::new(
            rooms.clone(),
            identities.clone(),
            clock.clone(),
        ));
        Self {
            rooms,
            identities,
            messages,
            clock,
        }
    }

    pub fn dependencies(&self, settings: ChatSettings) -> ChatServiceDependencies {
        ChatServiceDependencies {
            message_store: self.messages.clone(),
            identity_directory: self.identities.clone(),
            room_directory: self.rooms.clone(),
            clock: self.clock.clone(),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::{Duration, Utc};

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_append_then_fetch_returns_same_fields() {
        let memory = InMemoryCollaborators::new(Arc::new(SystemClock), AvatarUrl::default_avatar());
        memory.rooms.insert(room("general")).await;
        memory
            .identities
            .insert(UserProfile::new(
                user("alice"),
                AvatarUrl::new("/media/alice.png"),
                "",
            ))
            .await;

        let content = MessageContent::new("hi").unwrap();
        let stored = memory
            .messages
            .append_message(&room("general"), &user("alice"), &content)
            .await
            .unwrap();

        let history = memory
            .messages
            .fetch_recent(&room("general"), 50)
            .await
            .unwrap();
        assert_eq!(
            history,
            vec![HistoryEntry {
                id: stored.id,
                content: "hi".to_string(),
                username: user("alice"),
                avatar: AvatarUrl::new("/media/alice.png"),
                timestamp: stored.created_at,
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_recent_is_oldest_first_and_limited() {
        let memory = InMemoryCollaborators::new(Arc::new(SystemClock), AvatarUrl::default_avatar());
        memory.rooms.insert(room("general")).await;

        for i in 0..60 {
            let content = MessageContent::new(format!("message {i}")).unwrap();
            memory
                .messages
                .append_message(&room("general"), &user("bob"), &content)
                .await
                .unwrap();
        }

        let history = memory
            .messages
            .fetch_recent(&room("general"), 50)
            .await
            .unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].content, "message 10");
        assert_eq!(history[49].content, "message 59");
        assert!(history.windows(2).all(|w| w[0].id < w[1].id));
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let later = Utc::now();
        let rooms = Arc::new(InMemoryRoomDirectory::new());
        rooms.insert(room("general")).await;
        let identities: Arc<dyn IdentityDirectory> = Arc::new(InMemoryIdentityDirectory::default());

        let first = InMemoryMessageStore::new(
            rooms.clone(),
            identities.clone(),
            Arc::new(FixedClock(later)),
        );
        let content = MessageContent::new("x").unwrap();
        first
            .append_message(&room("general"), &user("a"), &content)
            .await
            .unwrap();

        // 时钟回拨后时间戳仍不回退
        let skewed = InMemoryMessageStore {
            clock: Arc::new(FixedClock(later - Duration::seconds(5))),
            ..first
        };
        let stored = skewed
            .append_message(&room("general"), &user("a"), &content)
            .await
            .unwrap();
        assert_eq!(stored.created_at, later);
        assert_eq!(stored.id, MessageId::new(2));
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let memory = InMemoryCollaborators::new(Arc::new(SystemClock), AvatarUrl::default_avatar());
        let content = MessageContent::new("x").unwrap();
        assert_eq!(
            memory
                .messages
                .append_message(&room("nowhere"), &user("a"), &content)
                .await,
            Err(RepositoryError::NotFound)
        );
        assert!(memory
            .rooms
            .find_by_name(&room("nowhere"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_identity_fallbacks() {
        let directory = InMemoryIdentityDirectory::new(AvatarUrl::new("/static/anon.png"));
        directory
            .insert(UserProfile::new(user("alice"), AvatarUrl::new("/a.png"), "bio"))
            .await;

        assert_eq!(
            directory.resolve_avatar(&user("ghost")).await.unwrap(),
            AvatarUrl::new("/static/anon.png")
        );
        let resolved = directory
            .batch_resolve(&[user("ghost"), user("alice")])
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].username, user("alice"));
    }
}
