//! 在线状态
//!
//! 在线集合直接从连接注册表推导，不单独存储。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{OnlineUser, RoomName, ServerEvent};

use crate::broadcaster::RoomBroadcaster;
use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;
use crate::repository::IdentityDirectory;
use crate::room_lock::RoomLocks;

pub struct PresenceService {
    registry: Arc<ConnectionRegistry>,
    identities: Arc<dyn IdentityDirectory>,
    broadcaster: RoomBroadcaster,
    /// 快照和广播在同一临界区内完成，后发布的快照不会被先前的覆盖
    publish_locks: RoomLocks,
}

impl PresenceService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        identities: Arc<dyn IdentityDirectory>,
        broadcaster: RoomBroadcaster,
    ) -> Self {
        Self {
            registry,
            identities,
            broadcaster,
            publish_locks: RoomLocks::new(),
        }
    }

    /// 房间在线用户快照
    ///
    /// 资料通过一次批量查询解析。目录中查不到的用户使用注册时的头像和空简介。
    pub async fn snapshot(&self, room: &RoomName) -> Result<Vec<OnlineUser>, ApplicationError> {
        let members = self.registry.list_members(room).await;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let usernames: Vec<_> = members.iter().map(|(username, _)| username.clone()).collect();
        let profiles: HashMap<_, _> = self
            .identities
            .batch_resolve(&usernames)
            .await?
            .into_iter()
            .map(|profile| (profile.username.clone(), profile))
            .collect();

        let online = members
            .into_iter()
            .map(|(username, avatar)| match profiles.get(&username) {
                Some(profile) => OnlineUser::from(profile),
                None => OnlineUser {
                    username,
                    avatar,
                    bio: String::new(),
                },
            })
            .collect();

        Ok(online)
    }

    /// 向房间广播最新的在线列表
    pub async fn publish(&self, room: &RoomName) -> Result<usize, ApplicationError> {
        let _guard = self.publish_locks.lock(room).await;

        let online_users = self.snapshot(room).await?;
        tracing::debug!(room = %room, online = online_users.len(), "发布在线列表");

        let event = ServerEvent::OnlineUsers { online_users };
        Ok(self.broadcaster.broadcast(room, &event).await)
    }
}
