//! 单个连接的会话状态机
//!
//! `Connecting → Active → Closed`。会话由传输层的连接任务独占持有，
//! 所有共享状态通过 `ChatService` 访问。

use std::sync::Arc;

use domain::{
    AvatarUrl, ClientFrame, MessageContent, Principal, RepositoryError, RoomName, ServerEvent,
    StoredMessage, Username,
};

use crate::error::ApplicationError;
use crate::registry::ConnectionHandle;
use crate::services::ChatService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// 激活成功后确定的成员身份
#[derive(Debug, Clone)]
struct Membership {
    room: RoomName,
    username: Username,
    avatar: AvatarUrl,
}

pub struct ChatSession {
    service: Arc<ChatService>,
    room_name: String,
    principal: Principal,
    handle: ConnectionHandle,
    state: SessionState,
    membership: Option<Membership>,
}

impl ChatSession {
    pub(crate) fn new(
        service: Arc<ChatService>,
        room_name: String,
        principal: Principal,
        handle: ConnectionHandle,
    ) -> Self {
        Self {
            service,
            room_name,
            principal,
            handle,
            state: SessionState::Connecting,
            membership: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn room(&self) -> Option<&RoomName> {
        self.membership.as_ref().map(|m| &m.room)
    }

    pub fn username(&self) -> Option<&Username> {
        self.principal.username()
    }

    /// 激活会话
    ///
    /// 顺序：推送历史消息 → 注册连接 → 发布在线列表 → 广播加入事件。
    /// 历史消息先于任何实时事件到达新连接，且每条消息要么在历史中，要么在实时流中。
    /// 任何一步失败会话都直接进入 `Closed`，且不会留下注册表记录。
    pub async fn activate(&mut self) -> Result<(), ApplicationError> {
        match self.state {
            SessionState::Connecting => {}
            SessionState::Active => return Ok(()),
            SessionState::Closed => return Err(ApplicationError::SessionClosed),
        }

        match self.join().await {
            Ok(membership) => {
                tracing::info!(
                    room = %membership.room,
                    username = %membership.username,
                    connection_id = %self.handle.id(),
                    "会话已激活"
                );
                self.membership = Some(membership);
                self.state = SessionState::Active;
                self.announce_join().await;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Closed;
                match &err {
                    ApplicationError::RejectedConnection => tracing::info!(
                        room = %self.room_name,
                        connection_id = %self.handle.id(),
                        "拒绝匿名连接"
                    ),
                    _ => tracing::error!(
                        room = %self.room_name,
                        connection_id = %self.handle.id(),
                        error = %err,
                        "会话激活失败"
                    ),
                }
                Err(err)
            }
        }
    }

    async fn join(&self) -> Result<Membership, ApplicationError> {
        let username = self
            .principal
            .username()
            .cloned()
            .ok_or(ApplicationError::RejectedConnection)?;
        let room = self.service.resolve_room(&self.room_name).await?;
        let avatar = self
            .service
            .identity_directory()
            .resolve_avatar(&username)
            .await?;

        // 拉取历史到完成注册期间持有房间锁，期间不会有消息被持久化和广播
        let room_guard = self.service.lock_room(&room).await;
        let history = self
            .service
            .message_store()
            .fetch_recent(&room, self.service.settings().history_limit)
            .await
            .map_err(|err| self.store_error(err))?;
        for entry in history {
            self.service
                .broadcaster()
                .send_to(&self.handle, ServerEvent::from(entry))?;
        }

        self.service
            .registry()
            .register(&room, &username, self.handle.clone(), avatar.clone())
            .await;
        drop(room_guard);

        Ok(Membership {
            room,
            username,
            avatar,
        })
    }

    async fn announce_join(&self) {
        let Some(membership) = &self.membership else {
            return;
        };
        self.publish_presence(&membership.room).await;
        let event = ServerEvent::UserJoined {
            username: membership.username.clone(),
            avatar: membership.avatar.clone(),
        };
        self.service
            .broadcaster()
            .broadcast(&membership.room, &event)
            .await;
    }

    /// 处理客户端发来的原始文本帧。格式错误的帧被忽略并返回 `Ok(None)`。
    pub async fn handle_frame(
        &mut self,
        text: &str,
    ) -> Result<Option<StoredMessage>, ApplicationError> {
        match ClientFrame::parse(text) {
            Ok(frame) => self.send_message(&frame.message).await.map(Some),
            Err(err) => {
                tracing::debug!(
                    connection_id = %self.handle.id(),
                    error = %err,
                    "忽略格式错误的客户端帧"
                );
                Ok(None)
            }
        }
    }

    /// 持久化并广播一条消息
    ///
    /// 持久化失败时不广播，会话保持 Active；房间已不存在时会话关闭。
    /// 房间内多于一人时为该消息安排投递状态推进。
    pub async fn send_message(&mut self, content: &str) -> Result<StoredMessage, ApplicationError> {
        let membership = match (&self.state, &self.membership) {
            (SessionState::Active, Some(membership)) => membership.clone(),
            _ => return Err(ApplicationError::SessionClosed),
        };

        let content = MessageContent::new(content)?;
        let send_guard = self.service.lock_room(&membership.room).await;
        let stored = match self
            .service
            .message_store()
            .append_message(&membership.room, &membership.username, &content)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                let err = self.store_error(err);
                tracing::error!(
                    room = %membership.room,
                    username = %membership.username,
                    error = %err,
                    "消息持久化失败"
                );
                drop(send_guard);
                if matches!(err, ApplicationError::UnknownRoom(_)) {
                    self.close().await;
                }
                return Err(err);
            }
        };

        let own_connection = self.handle.id();
        let message = content.into_inner();
        self.service
            .broadcaster()
            .broadcast_with(&membership.room, |connection_id| ServerEvent::ChatMessage {
                id: stored.id,
                message: message.clone(),
                username: membership.username.clone(),
                avatar: membership.avatar.clone(),
                timestamp: stored.created_at,
                is_current_user: connection_id == own_connection,
            })
            .await;
        drop(send_guard);

        if self.service.registry().member_count(&membership.room).await > 1 {
            self.service
                .scheduler()
                .schedule(membership.room.clone(), membership.username.clone(), stored.id)
                .await;
        }

        Ok(stored)
    }

    /// 关闭会话，可重复调用
    ///
    /// 只移除仍属于本连接的注册记录，然后发布在线列表并广播离开事件。
    /// 已被同一用户的新连接替换时用户仍在线，不发布也不广播。
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous != SessionState::Active {
            return;
        }
        let Some(membership) = self.membership.clone() else {
            return;
        };

        let removed = self
            .service
            .registry()
            .unregister_connection(&membership.room, &membership.username, self.handle.id())
            .await;

        tracing::info!(
            room = %membership.room,
            username = %membership.username,
            connection_id = %self.handle.id(),
            superseded = !removed,
            "会话已关闭"
        );
        if !removed {
            return;
        }

        self.publish_presence(&membership.room).await;
        let event = ServerEvent::UserLeft {
            username: membership.username.clone(),
        };
        self.service
            .broadcaster()
            .broadcast(&membership.room, &event)
            .await;
    }

    async fn publish_presence(&self, room: &RoomName) {
        if let Err(err) = self.service.presence().publish(room).await {
            tracing::warn!(room = %room, error = %err, "发布在线列表失败");
        }
    }

    fn store_error(&self, err: RepositoryError) -> ApplicationError {
        match err {
            RepositoryError::NotFound => ApplicationError::UnknownRoom(self.room_name.clone()),
            other => ApplicationError::Repository(other),
        }
    }
}
