//! 连接注册表
//!
//! 房间成员关系的唯一事实来源。每个房间内一个用户名最多对应一个连接，
//! 同名用户再次加入会覆盖旧连接（后写者胜出）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use domain::{AvatarUrl, ConnectionId, RoomName, ServerEvent, Timestamp, Username};
use tokio::sync::{mpsc, Mutex};

use crate::broadcaster::BroadcastError;
use crate::clock::Clock;

/// 连接的发送端。克隆后指向同一个连接。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// 创建连接句柄和对应的事件接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, event: ServerEvent) -> Result<(), BroadcastError> {
        self.sender
            .send(event)
            .map_err(|_| BroadcastError::RecipientGone(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// 注册表中的一条连接记录
#[derive(Debug, Clone)]
pub struct RegisteredConnection {
    pub handle: ConnectionHandle,
    pub avatar: AvatarUrl,
    pub joined_at: Timestamp,
}

type RoomMembers = BTreeMap<Username, RegisteredConnection>;

pub struct ConnectionRegistry {
    rooms: Mutex<HashMap<RoomName, RoomMembers>>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 注册连接，返回加入时间。同名旧连接被整体替换。
    pub async fn register(
        &self,
        room: &RoomName,
        username: &Username,
        handle: ConnectionHandle,
        avatar: AvatarUrl,
    ) -> Timestamp {
        let joined_at = self.clock.now();
        let connection_id = handle.id();
        let entry = RegisteredConnection {
            handle,
            avatar,
            joined_at,
        };

        let mut rooms = self.rooms.lock().await;
        let replaced = rooms
            .entry(room.clone())
            .or_default()
            .insert(username.clone(), entry);

        if let Some(previous) = replaced {
            tracing::debug!(
                room = %room,
                username = %username,
                connection_id = %connection_id,
                replaced_connection_id = %previous.handle.id(),
                "同名连接被替换"
            );
        }

        joined_at
    }

    /// 无条件移除用户在房间中的连接
    pub async fn unregister(&self, room: &RoomName, username: &Username) -> bool {
        let mut rooms = self.rooms.lock().await;
        Self::remove_member(&mut rooms, room, username, |_| true)
    }

    /// 仅当当前记录仍属于该连接时才移除，避免被替换的旧连接误删新连接
    pub async fn unregister_connection(
        &self,
        room: &RoomName,
        username: &Username,
        connection_id: ConnectionId,
    ) -> bool {
        let mut rooms = self.rooms.lock().await;
        Self::remove_member(&mut rooms, room, username, |entry| {
            entry.handle.id() == connection_id
        })
    }

    fn remove_member(
        rooms: &mut HashMap<RoomName, RoomMembers>,
        room: &RoomName,
        username: &Username,
        predicate: impl FnOnce(&RegisteredConnection) -> bool,
    ) -> bool {
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };

        let removed = match members.get(username) {
            Some(entry) if predicate(entry) => members.remove(username).is_some(),
            _ => false,
        };

        if members.is_empty() {
            rooms.remove(room);
        }

        removed
    }

    /// 房间内的用户名，按字典序排列
    pub async fn list_usernames(&self, room: &RoomName) -> Vec<Username> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 房间内的用户名及注册时记录的头像
    pub async fn list_members(&self, room: &RoomName) -> Vec<(Username, AvatarUrl)> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .map(|(username, entry)| (username.clone(), entry.avatar.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 用户当前的连接句柄
    pub async fn lookup(&self, room: &RoomName, username: &Username) -> Option<ConnectionHandle> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room)
            .and_then(|members| members.get(username))
            .map(|entry| entry.handle.clone())
    }

    pub async fn member_count(&self, room: &RoomName) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.get(room).map(BTreeMap::len).unwrap_or(0)
    }

    /// 当前有连接的房间
    pub async fn rooms(&self) -> Vec<RoomName> {
        let rooms = self.rooms.lock().await;
        let mut names: Vec<RoomName> = rooms.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn connection_count(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().map(BTreeMap::len).sum()
    }

    /// 持锁访问房间成员。广播在锁内入队，保证同一房间的事件对每个接收者全序。
    pub(crate) async fn with_members<R>(
        &self,
        room: &RoomName,
        f: impl FnOnce(Option<&RoomMembers>) -> R,
    ) -> R {
        let rooms = self.rooms.lock().await;
        f(rooms.get(room))
    }
}
