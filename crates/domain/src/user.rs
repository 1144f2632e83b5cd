use crate::value_objects::{Timestamp, UserId, Username};

/// 聊天用户。注册与认证由外部服务负责，这里只关心展示名与在线状态。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub is_online: bool,
    pub created_at: Timestamp,
}

impl User {
    pub fn new(id: UserId, username: Username, now: Timestamp) -> Self {
        Self {
            id,
            username,
            is_online: false,
            created_at: now,
        }
    }

    pub fn set_online(&mut self, online: bool) {
        self.is_online = online;
    }
}
