//! 聊天相关的推送事件
//!
//! 每个事件序列化为一条 JSON 文本帧，`type` 字段区分事件种类，
//! 由广播总线原样转发给房间内的每个会话（包括发送者自己）。

use serde::{Deserialize, Serialize};

use crate::display::{format_date, format_time};
use crate::message::{Message, ReplySnapshot};
use crate::value_objects::{MediaFormat, MessageId};

/// 事件里携带的消息形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFormat {
    Text,
    Media,
}

/// 推送给房间的聊天事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// 当前在线成员数
    #[serde(rename = "chat.active")]
    Active { content: u64 },

    /// 成员加入/离开通知
    #[serde(rename = "chat.notification")]
    Notification { content: String },

    /// 文本消息
    #[serde(rename = "chat.message")]
    Message {
        id: MessageId,
        text_content: String,
        message_format: EventFormat,
        username: String,
        created: String,
        time: String,
    },

    /// 回复（文本或媒体）
    #[serde(rename = "chat.reply")]
    Reply(ReplyEvent),

    /// 媒体消息，content 为 base64 编码的原始字节
    #[serde(rename = "chat.media")]
    Media {
        id: MessageId,
        content: String,
        media_format: MediaFormat,
        message_format: EventFormat,
        filename: String,
        username: String,
        created: String,
        time: String,
    },

    /// 正在输入；content 为 null 表示停止输入
    #[serde(rename = "chat.typing")]
    Typing {
        username: String,
        content: Option<String>,
    },

    #[serde(rename = "chat.error")]
    Error { content: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEvent {
    pub is_reply: bool,
    pub id: MessageId,
    pub username: String,
    pub created: String,
    pub time: String,
    pub previous_sender_username: String,
    pub previous_message_content: String,
    pub previous_message_id: MessageId,
    #[serde(flatten)]
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply_format", rename_all = "lowercase")]
pub enum ReplyBody {
    Text {
        text_content: String,
        message_format: EventFormat,
    },
    Media {
        content: String,
        media_format: MediaFormat,
        message_format: EventFormat,
        filename: String,
    },
}

pub const TYPING_SIGNAL: &str = "typing";

impl ChatEvent {
    pub fn active(count: u64) -> Self {
        ChatEvent::Active { content: count }
    }

    pub fn joined(username: &str) -> Self {
        ChatEvent::Notification {
            content: format!("{username} joined the chat."),
        }
    }

    pub fn left(username: &str) -> Self {
        ChatEvent::Notification {
            content: format!("{username} left the chat."),
        }
    }

    pub fn message(message: &Message) -> Self {
        ChatEvent::Message {
            id: message.id.clone(),
            text_content: message.text_content.clone().unwrap_or_default(),
            message_format: EventFormat::Text,
            username: message.sender_username.clone(),
            created: format_date(&message.created_at),
            time: format_time(&message.created_at),
        }
    }

    pub fn text_reply(reply: &Message, snapshot: &ReplySnapshot) -> Self {
        ChatEvent::Reply(ReplyEvent::new(
            reply,
            snapshot,
            ReplyBody::Text {
                text_content: reply.text_content.clone().unwrap_or_default(),
                message_format: EventFormat::Text,
            },
        ))
    }

    pub fn media(message: &Message, content: String, media_format: MediaFormat, filename: String) -> Self {
        ChatEvent::Media {
            id: message.id.clone(),
            content,
            media_format,
            message_format: EventFormat::Media,
            filename,
            username: message.sender_username.clone(),
            created: format_date(&message.created_at),
            time: format_time(&message.created_at),
        }
    }

    pub fn media_reply(
        reply: &Message,
        snapshot: &ReplySnapshot,
        content: String,
        media_format: MediaFormat,
        filename: String,
    ) -> Self {
        ChatEvent::Reply(ReplyEvent::new(
            reply,
            snapshot,
            ReplyBody::Media {
                content,
                media_format,
                message_format: EventFormat::Media,
                filename,
            },
        ))
    }

    /// 只有载荷恰好是 `"typing"` 时才带上状态文本
    pub fn typing(username: &str, signal: Option<&str>) -> Self {
        ChatEvent::Typing {
            username: username.to_owned(),
            content: (signal == Some(TYPING_SIGNAL)).then(|| format!("{username} is typing...")),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        ChatEvent::Error {
            content: content.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::Active { .. } => "chat.active",
            ChatEvent::Notification { .. } => "chat.notification",
            ChatEvent::Message { .. } => "chat.message",
            ChatEvent::Reply(_) => "chat.reply",
            ChatEvent::Media { .. } => "chat.media",
            ChatEvent::Typing { .. } => "chat.typing",
            ChatEvent::Error { .. } => "chat.error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ReplyEvent {
    fn new(reply: &Message, snapshot: &ReplySnapshot, body: ReplyBody) -> Self {
        Self {
            is_reply: true,
            id: reply.id.clone(),
            username: reply.sender_username.clone(),
            created: format_date(&reply.created_at),
            time: format_time(&reply.created_at),
            previous_sender_username: snapshot.previous_sender_username.clone(),
            previous_message_content: snapshot.previous_message_content.clone(),
            previous_message_id: snapshot.previous_message_id.clone(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;
    use crate::value_objects::{MessageFormat, RoomId, UserId, Username};
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn user(name: &str) -> User {
        User::new(
            UserId::from(Uuid::new_v4()),
            Username::parse(name).unwrap(),
            chrono::Utc::now(),
        )
    }

    fn noon() -> crate::Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
    }

    #[test]
    fn active_event_shape() {
        let value = serde_json::to_value(ChatEvent::active(2)).unwrap();
        assert_eq!(value, json!({"type": "chat.active", "content": 2}));
    }

    #[test]
    fn notification_text() {
        let value = serde_json::to_value(ChatEvent::joined("admin")).unwrap();
        assert_eq!(
            value,
            json!({"type": "chat.notification", "content": "admin joined the chat."})
        );
        assert_eq!(
            serde_json::to_value(ChatEvent::left("B")).unwrap()["content"],
            "B left the chat."
        );
    }

    #[test]
    fn message_event_splits_date_and_time() {
        let b = user("B");
        let message = Message::text(MessageId::from("m1"), RoomId::from("r1"), &b, "hi", noon());
        let value = serde_json::to_value(ChatEvent::message(&message)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "chat.message",
                "id": "m1",
                "text_content": "hi",
                "message_format": "text",
                "username": "B",
                "created": "Mar. 09, 2024",
                "time": "noon",
            })
        );
    }

    #[test]
    fn text_reply_flattens_snapshot() {
        let a = user("A");
        let b = user("B");
        let original = Message::text(MessageId::from("m1"), RoomId::from("r1"), &b, "hi", noon());
        let snapshot = ReplySnapshot::capture(&original);
        let reply = Message::reply(
            MessageId::from("m2"),
            RoomId::from("r1"),
            &a,
            MessageFormat::Text,
            Some("hello back".into()),
            snapshot.clone(),
            noon(),
        );

        let value = serde_json::to_value(ChatEvent::text_reply(&reply, &snapshot)).unwrap();
        assert_eq!(value["type"], "chat.reply");
        assert_eq!(value["is_reply"], true);
        assert_eq!(value["reply_format"], "text");
        assert_eq!(value["message_format"], "text");
        assert_eq!(value["text_content"], "hello back");
        assert_eq!(value["previous_message_content"], "hi");
        assert_eq!(value["previous_sender_username"], "B");
        assert_eq!(value["previous_message_id"], "m1");
        assert_eq!(value["username"], "A");
    }

    #[test]
    fn media_reply_shape() {
        let a = user("A");
        let original = Message::media_placeholder(
            MessageId::from("m1"),
            RoomId::from("r1"),
            &a,
            MediaFormat::Audio,
            noon(),
        );
        let snapshot = ReplySnapshot::capture(&original);
        let reply = Message::reply(
            MessageId::from("m2"),
            RoomId::from("r1"),
            &a,
            MessageFormat::Image,
            None,
            snapshot.clone(),
            noon(),
        );
        let event = ChatEvent::media_reply(
            &reply,
            &snapshot,
            "AAEC".into(),
            MediaFormat::Image,
            "media_1_000001.png".into(),
        );
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reply_format"], "media");
        assert_eq!(value["message_format"], "media");
        assert_eq!(value["media_format"], "image");
        assert_eq!(value["previous_message_content"], "AUDIO");
        assert_eq!(value["content"], "AAEC");

        let parsed: ChatEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn typing_only_for_exact_signal() {
        let typing = serde_json::to_value(ChatEvent::typing("B", Some("typing"))).unwrap();
        assert_eq!(typing["content"], "B is typing...");

        let stopped = serde_json::to_value(ChatEvent::typing("B", Some("stopped"))).unwrap();
        assert_eq!(stopped["content"], Value::Null);

        let missing = serde_json::to_value(ChatEvent::typing("B", None)).unwrap();
        assert_eq!(missing["content"], Value::Null);
    }
}
