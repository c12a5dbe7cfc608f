//! 投递状态调度器
//!
//! 模拟 sent → delivered → seen 的状态推进。每条消息一个独立的延迟任务，
//! 触发时重新从注册表解析发送者的当前连接；发送者不在房间则静默跳过，不重试。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::{DeliveryStatus, MessageDelivery, MessageId, RoomName, ServerEvent, Username};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broadcaster::RoomBroadcaster;
use crate::clock::Clock;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct DeliveryStatusScheduler {
    registry: Arc<ConnectionRegistry>,
    broadcaster: RoomBroadcaster,
    clock: Arc<dyn Clock>,
    delivered_delay: Duration,
    seen_delay: Duration,
    ledger: Arc<Mutex<HashMap<MessageId, MessageDelivery>>>,
}

impl DeliveryStatusScheduler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: RoomBroadcaster,
        clock: Arc<dyn Clock>,
        delivered_delay: Duration,
        seen_delay: Duration,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            clock,
            delivered_delay,
            seen_delay,
            ledger: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 登记消息为 sent 并启动后台推进任务，不等待任何延迟
    pub async fn schedule(
        &self,
        room: RoomName,
        username: Username,
        message_id: MessageId,
    ) -> JoinHandle<()> {
        self.track(message_id, &username).await;

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(room, username, message_id).await })
    }

    /// 仍在推进中的消息状态
    pub async fn status(&self, message_id: MessageId) -> Option<DeliveryStatus> {
        let ledger = self.ledger.lock().await;
        ledger.get(&message_id).map(|delivery| delivery.status)
    }

    pub async fn in_flight(&self) -> usize {
        self.ledger.lock().await.len()
    }

    async fn track(&self, message_id: MessageId, username: &Username) {
        let delivery = MessageDelivery::new_sent(message_id, username.clone(), self.clock.now());
        self.ledger.lock().await.insert(message_id, delivery);
    }

    async fn run(&self, room: RoomName, username: Username, message_id: MessageId) {
        let mut status = DeliveryStatus::Sent;
        while let Some(next) = status.next() {
            status = next;
            tokio::time::sleep(self.delay_before(status)).await;

            // 每一步都重新解析发送者的当前连接，缺席只跳过这一次更新
            let Some(handle) = self.registry.lookup(&room, &username).await else {
                tracing::debug!(
                    room = %room,
                    username = %username,
                    message_id = %message_id,
                    status = %status,
                    "发送者不在房间，跳过状态更新"
                );
                continue;
            };

            if !self.advance(message_id, status).await {
                break;
            }

            let event = ServerEvent::MessageStatusUpdate { message_id, status };
            if let Err(err) = self.broadcaster.send_to(&handle, event) {
                tracing::debug!(
                    room = %room,
                    username = %username,
                    message_id = %message_id,
                    error = %err,
                    "状态更新的接收连接已关闭"
                );
            }
        }

        self.ledger.lock().await.remove(&message_id);
    }

    fn delay_before(&self, status: DeliveryStatus) -> Duration {
        match status {
            DeliveryStatus::Delivered => self.delivered_delay,
            _ => self.seen_delay,
        }
    }

    async fn advance(&self, message_id: MessageId, status: DeliveryStatus) -> bool {
        let mut ledger = self.ledger.lock().await;
        let Some(delivery) = ledger.get_mut(&message_id) else {
            return false;
        };
        match delivery.advance(status, self.clock.now()) {
            Ok(advanced) => advanced,
            Err(err) => {
                tracing::warn!(message_id = %message_id, error = %err, "投递状态回退被拒绝");
                false
            }
        }
    }
}
