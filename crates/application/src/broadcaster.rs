use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChatEvent, RoomId};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 会话在广播组中的登记标识
pub type SubscriptionId = Uuid;

/// 序列化后的事件帧，同一事件在所有订阅者之间共享
pub type EventFrame = Arc<str>;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 一次订阅：登记标识和接收事件帧的通道
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<EventFrame>,
}

/// 房间广播总线
///
/// 每个订阅者按发布顺序收到订阅之后、退订之前发布到该房间的每个事件。
/// 已关闭的订阅者不会影响其他订阅者的投递。
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    async fn subscribe(&self, room_id: &RoomId) -> Subscription;

    /// 返回是否确实移除了订阅；重复退订返回 false
    async fn unsubscribe(&self, room_id: &RoomId, id: SubscriptionId) -> bool;

    /// 返回成功投递的订阅者数量
    async fn publish(&self, room_id: &RoomId, event: &ChatEvent) -> Result<usize, BroadcastError>;

    /// 只投递给房间内的某一个订阅者
    async fn send_to(
        &self,
        room_id: &RoomId,
        id: SubscriptionId,
        event: &ChatEvent,
    ) -> Result<bool, BroadcastError>;

    async fn subscriber_count(&self, room_id: &RoomId) -> usize;
}
