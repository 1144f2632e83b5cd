//! 成员变更与在线人数的通知
//!
//! 房间成员增删由 `RoomService` 显式调用这里，而不是依赖隐式的变更钩子；
//! 创建房间时的初始成员不会触发通知。

use std::sync::Arc;

use domain::{ChatEvent, RoomId, UserId};

use crate::broadcaster::RoomBroadcaster;
use crate::error::ApplicationError;
use crate::repository::{RoomRepository, UserRepository};

pub struct PresenceNotifier {
    users: Arc<dyn UserRepository>,
    rooms: Arc<dyn RoomRepository>,
    broadcaster: Arc<dyn RoomBroadcaster>,
}

impl PresenceNotifier {
    pub fn new(
        users: Arc<dyn UserRepository>,
        rooms: Arc<dyn RoomRepository>,
        broadcaster: Arc<dyn RoomBroadcaster>,
    ) -> Self {
        Self {
            users,
            rooms,
            broadcaster,
        }
    }

    /// 对每个新加入的成员发布 "{username} joined the chat."
    pub async fn members_added(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<(), ApplicationError> {
        for user_id in user_ids {
            if let Some(user) = self.users.find_by_id(*user_id).await? {
                self.broadcaster
                    .publish(room_id, &ChatEvent::joined(user.username.as_str()))
                    .await?;
            }
        }
        Ok(())
    }

    /// 对每个被移除的成员发布 "{username} left the chat."
    pub async fn members_removed(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<(), ApplicationError> {
        for user_id in user_ids {
            if let Some(user) = self.users.find_by_id(*user_id).await? {
                self.broadcaster
                    .publish(room_id, &ChatEvent::left(user.username.as_str()))
                    .await?;
            }
        }
        Ok(())
    }

    /// 重新统计在线成员数并广播给整个房间
    pub async fn announce_active_count(&self, room_id: &RoomId) -> Result<u64, ApplicationError> {
        let count = self.rooms.active_member_count(room_id).await?;
        self.broadcaster
            .publish(room_id, &ChatEvent::active(count))
            .await?;
        tracing::debug!(room_id = %room_id, active = count, "广播在线人数");
        Ok(count)
    }

    /// 标记用户在线状态
    pub async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), ApplicationError> {
        self.users.set_online(user_id, online).await?;
        Ok(())
    }
}
