use std::collections::BTreeSet;

use crate::errors::DomainError;
use crate::value_objects::{short_id, RoomId, Timestamp, UserId};

const MAX_ROOM_NAME_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    pub members: BTreeSet<UserId>,
    pub created_at: Timestamp,
}

impl ChatRoom {
    /// 创建房间。名称为空时自动生成 `room-xxxxxxxxxx`。
    pub fn new(
        id: RoomId,
        name: Option<String>,
        creator_id: UserId,
        members: impl IntoIterator<Item = UserId>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = match name {
            Some(name) if !name.trim().is_empty() => Self::validate_name(name)?,
            _ => Self::generate_name(),
        };
        Ok(Self {
            id,
            name,
            creator_id,
            members: members.into_iter().collect(),
            created_at,
        })
    }

    pub fn generate_name() -> String {
        format!("room-{}", short_id(10))
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    /// 返回成员集合是否发生变化
    pub fn add_member(&mut self, user_id: UserId) -> bool {
        self.members.insert(user_id)
    }

    pub fn remove_member(&mut self, user_id: UserId) -> bool {
        self.members.remove(&user_id)
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.len() > MAX_ROOM_NAME_LEN {
            return Err(DomainError::invalid_argument("room_name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}
