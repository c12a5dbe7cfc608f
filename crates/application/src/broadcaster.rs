//! 房间广播
//!
//! 单个接收者投递失败只记录日志，不影响其他接收者，也不向调用方传播。

use std::sync::Arc;

use domain::{ConnectionId, RoomName, ServerEvent};
use thiserror::Error;

use crate::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("recipient connection {0} is gone")]
    RecipientGone(ConnectionId),
}

#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 向房间当前所有连接发送同一事件，返回成功投递的连接数
    pub async fn broadcast(&self, room: &RoomName, event: &ServerEvent) -> usize {
        self.broadcast_with(room, |_| event.clone()).await
    }

    /// 按接收连接构造事件后广播
    ///
    /// 成员在调用时读取一次，之后加入的连接收不到本次事件。
    pub async fn broadcast_with<F>(&self, room: &RoomName, mut build: F) -> usize
    where
        F: FnMut(ConnectionId) -> ServerEvent,
    {
        self.registry
            .with_members(room, |members| {
                let Some(members) = members else {
                    return 0;
                };

                let mut delivered = 0;
                for (username, entry) in members {
                    let event = build(entry.handle.id());
                    match entry.handle.send(event) {
                        Ok(()) => delivered += 1,
                        Err(err) => {
                            tracing::warn!(
                                room = %room,
                                username = %username,
                                connection_id = %entry.handle.id(),
                                error = %err,
                                "广播投递失败，跳过该连接"
                            );
                        }
                    }
                }
                delivered
            })
            .await
    }

    /// 只发送给一个连接
    pub fn send_to(
        &self,
        handle: &ConnectionHandle,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        handle.send(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use domain::{AvatarUrl, Username};

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_abort_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SystemClock)));
        let broadcaster = RoomBroadcaster::new(registry.clone());
        let general = RoomName::parse("general").unwrap();

        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (bob, bob_rx) = ConnectionHandle::new();
        let (carol, mut carol_rx) = ConnectionHandle::new();
        registry
            .register(&general, &user("alice"), alice, AvatarUrl::default_avatar())
            .await;
        registry
            .register(&general, &user("bob"), bob, AvatarUrl::default_avatar())
            .await;
        registry
            .register(&general, &user("carol"), carol, AvatarUrl::default_avatar())
            .await;
        drop(bob_rx);

        let event = ServerEvent::UserLeft {
            username: user("dave"),
        };
        let delivered = broadcaster.broadcast(&general, &event).await;

        assert_eq!(delivered, 2);
        assert_eq!(alice_rx.recv().await, Some(event.clone()));
        assert_eq!(carol_rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_broadcast_with_builds_per_recipient() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SystemClock)));
        let broadcaster = RoomBroadcaster::new(registry.clone());
        let general = RoomName::parse("general").unwrap();

        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (bob, mut bob_rx) = ConnectionHandle::new();
        let alice_id = alice.id();
        registry
            .register(&general, &user("alice"), alice, AvatarUrl::default_avatar())
            .await;
        registry
            .register(&general, &user("bob"), bob, AvatarUrl::default_avatar())
            .await;

        broadcaster
            .broadcast_with(&general, |id| ServerEvent::UserJoined {
                username: if id == alice_id { user("me") } else { user("other") },
                avatar: AvatarUrl::default_avatar(),
            })
            .await;

        assert!(matches!(
            alice_rx.recv().await,
            Some(ServerEvent::UserJoined { username, .. }) if username.as_str() == "me"
        ));
        assert!(matches!(
            bob_rx.recv().await,
            Some(ServerEvent::UserJoined { username, .. }) if username.as_str() == "other"
        ));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SystemClock)));
        let broadcaster = RoomBroadcaster::new(registry);
        let event = ServerEvent::UserLeft {
            username: user("alice"),
        };
        let empty = RoomName::parse("empty").unwrap();
        assert_eq!(broadcaster.broadcast(&empty, &event).await, 0);
    }
}
