use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, Timestamp, Username};

/// 消息投递状态：sent → delivered → seen，只能前进。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Seen => "seen",
        }
    }

    /// 下一个状态，`Seen` 为终态。
    pub fn next(self) -> Option<Self> {
        match self {
            DeliveryStatus::Sent => Some(DeliveryStatus::Delivered),
            DeliveryStatus::Delivered => Some(DeliveryStatus::Seen),
            DeliveryStatus::Seen => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条消息的投递进度
///
/// 只保存在内存中，只有原发送者能观察到，进程重启或发送者断开即丢失。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDelivery {
    pub message_id: MessageId,
    pub sender: Username,
    pub status: DeliveryStatus,
    pub sent_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MessageDelivery {
    /// 创建新的投递记录（发送状态）
    pub fn new_sent(message_id: MessageId, sender: Username, sent_at: Timestamp) -> Self {
        Self {
            message_id,
            sender,
            status: DeliveryStatus::Sent,
            sent_at,
            updated_at: sent_at,
        }
    }

    /// 推进到目标状态。重复推进到当前状态返回 `Ok(false)`，回退返回错误。
    pub fn advance(&mut self, to: DeliveryStatus, at: Timestamp) -> DomainResult<bool> {
        if to < self.status {
            return Err(DomainError::StatusRegression {
                from: self.status,
                to,
            });
        }
        if to == self.status {
            return Ok(false);
        }
        self.status = to;
        self.updated_at = at;
        Ok(true)
    }

    pub fn is_seen(&self) -> bool {
        self.status == DeliveryStatus::Seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_message_delivery_lifecycle() {
        let sent_at = Utc::now();
        let mut delivery =
            MessageDelivery::new_sent(MessageId::new(7), Username::parse("alice").unwrap(), sent_at);
        assert_eq!(delivery.status, DeliveryStatus::Sent);
        assert!(!delivery.is_seen());

        let delivered_at = sent_at + Duration::seconds(1);
        assert!(delivery.advance(DeliveryStatus::Delivered, delivered_at).unwrap());
        assert_eq!(delivery.updated_at, delivered_at);

        // 重复推进是无操作
        assert!(!delivery.advance(DeliveryStatus::Delivered, delivered_at).unwrap());

        assert!(delivery
            .advance(DeliveryStatus::Seen, delivered_at + Duration::seconds(2))
            .unwrap());
        assert!(delivery.is_seen());
    }

    #[test]
    fn test_status_never_regresses() {
        let now = Utc::now();
        let mut delivery =
            MessageDelivery::new_sent(MessageId::new(1), Username::parse("bob").unwrap(), now);
        delivery.advance(DeliveryStatus::Seen, now).unwrap();

        let err = delivery.advance(DeliveryStatus::Delivered, now).unwrap_err();
        assert_eq!(
            err,
            DomainError::StatusRegression {
                from: DeliveryStatus::Seen,
                to: DeliveryStatus::Delivered,
            }
        );
        assert_eq!(delivery.status, DeliveryStatus::Seen);
    }

    #[test]
    fn test_status_order_and_wire_names() {
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Seen);
        assert_eq!(DeliveryStatus::Sent.next(), Some(DeliveryStatus::Delivered));
        assert_eq!(DeliveryStatus::Seen.next(), None);
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Delivered).unwrap(),
            "\"delivered\""
        );
    }
}
