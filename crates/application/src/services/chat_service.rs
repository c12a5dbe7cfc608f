use std::sync::Arc;
use std::time::Duration;

use domain::{HistoryEntry, OnlineUser, Principal, RoomName, DEFAULT_HISTORY_LIMIT};

use crate::{
    broadcaster::RoomBroadcaster,
    clock::Clock,
    delivery::DeliveryStatusScheduler,
    error::ApplicationError,
    presence::PresenceService,
    registry::{ConnectionHandle, ConnectionRegistry},
    repository::{IdentityDirectory, MessageStore, RoomDirectory},
    room_lock::RoomLocks,
    session::ChatSession,
};
use tokio::sync::OwnedMutexGuard;

/// 聊天核心的可调参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub history_limit: usize,
    pub delivered_delay: Duration,
    pub seen_delay: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            delivered_delay: Duration::from_secs(1),
            seen_delay: Duration::from_secs(2),
        }
    }
}

impl From<&config::ChatConfig> for ChatSettings {
    fn from(config: &config::ChatConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            delivered_delay: config.delivered_delay(),
            seen_delay: config.seen_delay(),
        }
    }
}

pub struct ChatServiceDependencies {
    pub message_store: Arc<dyn MessageStore>,
    pub identity_directory: Arc<dyn IdentityDirectory>,
    pub room_directory: Arc<dyn RoomDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 组装注册表、广播、在线状态和投递调度，并为每个连接创建会话
pub struct ChatService {
    deps: ChatServiceDependencies,
    registry: Arc<ConnectionRegistry>,
    broadcaster: RoomBroadcaster,
    presence: PresenceService,
    scheduler: DeliveryStatusScheduler,
    /// 持久化与广播在同一临界区内完成，保证接收者看到的 id 严格递增；
    /// 加入时的拉取历史与注册也在同一把锁下进行
    room_locks: RoomLocks,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(deps.clock.clone()));
        let broadcaster = RoomBroadcaster::new(registry.clone());
        let presence = PresenceService::new(
            registry.clone(),
            deps.identity_directory.clone(),
            broadcaster.clone(),
        );
        let scheduler = DeliveryStatusScheduler::new(
            registry.clone(),
            broadcaster.clone(),
            deps.clock.clone(),
            deps.settings.delivered_delay,
            deps.settings.seen_delay,
        );

        Self {
            deps,
            registry,
            broadcaster,
            presence,
            scheduler,
            room_locks: RoomLocks::new(),
        }
    }

    /// 为新连接创建处于 Connecting 状态的会话，调用方随后执行 `activate`
    pub fn open_session(
        self: &Arc<Self>,
        room_name: impl Into<String>,
        principal: Principal,
        handle: ConnectionHandle,
    ) -> ChatSession {
        ChatSession::new(self.clone(), room_name.into(), principal, handle)
    }

    /// 房间在线用户
    pub async fn online_users(&self, room_name: &str) -> Result<Vec<OnlineUser>, ApplicationError> {
        let room = self.resolve_room(room_name).await?;
        self.presence.snapshot(&room).await
    }

    /// 房间最近消息，条数不超过配置的历史上限
    pub async fn recent_messages(
        &self,
        room_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, ApplicationError> {
        let room = self.resolve_room(room_name).await?;
        let limit = limit
            .unwrap_or(self.deps.settings.history_limit)
            .clamp(1, self.deps.settings.history_limit);
        Ok(self.deps.message_store.fetch_recent(&room, limit).await?)
    }

    /// 名称非法或目录中不存在都视为未知房间
    pub async fn resolve_room(&self, room_name: &str) -> Result<RoomName, ApplicationError> {
        let unknown = || ApplicationError::UnknownRoom(room_name.to_string());
        let name = RoomName::parse(room_name).map_err(|_| unknown())?;
        let room = self
            .deps
            .room_directory
            .find_by_name(&name)
            .await?
            .ok_or_else(unknown)?;
        Ok(room.name)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &DeliveryStatusScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.deps.settings
    }

    pub(crate) async fn lock_room(&self, room: &RoomName) -> OwnedMutexGuard<()> {
        self.room_locks.lock(room).await
    }

    pub(crate) fn broadcaster(&self) -> &RoomBroadcaster {
        &self.broadcaster
    }

    pub(crate) fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub(crate) fn message_store(&self) -> &Arc<dyn MessageStore> {
        &self.deps.message_store
    }

    pub(crate) fn identity_directory(&self) -> &Arc<dyn IdentityDirectory> {
        &self.deps.identity_directory
    }
}
