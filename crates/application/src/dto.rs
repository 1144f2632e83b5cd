use domain::display::{format_created, format_date, format_time};
use domain::{ChatRoom, Message, MessageFormat, Timestamp, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub is_online: bool,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: Uuid::from(user.id),
            username: user.username.to_string(),
            is_online: user.is_online,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDto {
    pub id: String,
    pub room_name: String,
    pub creator_id: Uuid,
    pub members: Vec<Uuid>,
    pub created: Timestamp,
}

impl From<&ChatRoom> for RoomDto {
    fn from(room: &ChatRoom) -> Self {
        Self {
            id: room.id.to_string(),
            room_name: room.name.clone(),
            creator_id: Uuid::from(room.creator_id),
            members: room.members.iter().copied().map(Uuid::from).collect(),
            created: room.created_at,
        }
    }
}

/// 历史消息的序列化形态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub message_format: MessageFormat,
    pub text_content: Option<String>,
    /// 媒体文件的存储路径
    pub media: Option<String>,
    pub is_reply: bool,
    pub previous_message_content: Option<String>,
    pub previous_message_id: Option<String>,
    pub previous_sender_username: Option<String>,
    pub username: String,
    pub created: String,
    pub date: String,
    pub time: String,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        let reply = message.reply.as_ref();
        Self {
            id: message.id.to_string(),
            message_format: message.format,
            text_content: message.text_content.clone(),
            media: message.media.as_ref().map(|media| media.path.clone()),
            is_reply: message.is_reply(),
            previous_message_content: reply.map(|r| r.previous_message_content.clone()),
            previous_message_id: reply.map(|r| r.previous_message_id.to_string()),
            previous_sender_username: reply.map(|r| r.previous_sender_username.clone()),
            username: message.sender_username.clone(),
            created: format_created(&message.created_at),
            date: format_date(&message.created_at),
            time: format_time(&message.created_at),
        }
    }
}

/// 一页历史消息；`previous_messages` 是更早一页的游标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub results: Vec<MessageDto>,
    pub previous_messages: Option<String>,
}
