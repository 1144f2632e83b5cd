// 单进程内的房间广播总线
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChatEvent, RoomId};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::broadcaster::{
    BroadcastError, EventFrame, RoomBroadcaster, Subscription, SubscriptionId,
};

type RoomGroup = HashMap<SubscriptionId, mpsc::UnboundedSender<EventFrame>>;

/// 每个房间一把锁：同一房间内的订阅、退订、发布互相串行，不同房间互不阻塞。
#[derive(Default)]
pub struct LocalRoomBroadcaster {
    groups: RwLock<HashMap<RoomId, Arc<Mutex<RoomGroup>>>>,
}

impl LocalRoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    async fn group(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomGroup>>> {
        self.groups.read().await.get(room_id).cloned()
    }

    fn encode(event: &ChatEvent) -> Result<EventFrame, BroadcastError> {
        Ok(Arc::from(event.to_json()?))
    }
}

#[async_trait]
impl RoomBroadcaster for LocalRoomBroadcaster {
    async fn subscribe(&self, room_id: &RoomId) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        // 持有外层写锁完成登记，避免与空组回收交错
        let mut groups = self.groups.write().await;
        let group = groups.entry(room_id.clone()).or_default().clone();
        group.lock().await.insert(id, sender);

        tracing::debug!(room_id = %room_id, subscription_id = %id, "会话加入广播组");
        Subscription { id, receiver }
    }

    async fn unsubscribe(&self, room_id: &RoomId, id: SubscriptionId) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get(room_id).cloned() else {
            return false;
        };

        let mut members = group.lock().await;
        let removed = members.remove(&id).is_some();
        if members.is_empty() {
            drop(members);
            groups.remove(room_id);
        }

        if removed {
            tracing::debug!(room_id = %room_id, subscription_id = %id, "会话离开广播组");
        }
        removed
    }

    async fn publish(&self, room_id: &RoomId, event: &ChatEvent) -> Result<usize, BroadcastError> {
        let frame = Self::encode(event)?;
        let Some(group) = self.group(room_id).await else {
            return Ok(0);
        };

        let mut members = group.lock().await;
        let mut delivered = 0;
        // 已关闭的接收端直接剔除，不影响其他订阅者
        members.retain(|id, sender| match sender.send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(room_id = %room_id, subscription_id = %id, "剔除已关闭的订阅者");
                false
            }
        });

        tracing::debug!(
            room_id = %room_id,
            event_type = event.event_type(),
            delivered,
            "广播事件"
        );
        Ok(delivered)
    }

    async fn send_to(
        &self,
        room_id: &RoomId,
        id: SubscriptionId,
        event: &ChatEvent,
    ) -> Result<bool, BroadcastError> {
        let frame = Self::encode(event)?;
        let Some(group) = self.group(room_id).await else {
            return Ok(false);
        };
        let members = group.lock().await;
        Ok(members
            .get(&id)
            .map(|sender| sender.send(frame).is_ok())
            .unwrap_or(false))
    }

    async fn subscriber_count(&self, room_id: &RoomId) -> usize {
        match self.group(room_id).await {
            Some(group) => group.lock().await.len(),
            None => 0,
        }
    }
}
