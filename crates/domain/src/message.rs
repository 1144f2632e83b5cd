use crate::user::User;
use crate::value_objects::{MediaFormat, MessageFormat, MessageId, RoomId, Timestamp, UserId};

/// 已持久化的媒体附件（按引用存储）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaAttachment {
    pub format: MediaFormat,
    pub filename: String,
    /// 媒体存储返回的相对路径
    pub path: String,
}

/// 回复时对原消息的快照。
///
/// 内容与发送者名称都在回复那一刻复制下来，之后原消息或原发送者发生变化
/// 都不会影响这里的数据。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplySnapshot {
    pub previous_message_id: MessageId,
    pub previous_sender_id: UserId,
    pub previous_sender_username: String,
    pub previous_message_content: String,
}

impl ReplySnapshot {
    pub fn capture(original: &Message) -> Self {
        Self {
            previous_message_id: original.id.clone(),
            previous_sender_id: original.sender_id,
            previous_sender_username: original.sender_username.clone(),
            previous_message_content: original.snapshot_content(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// 读取时由仓储根据发送者填充
    pub sender_username: String,
    pub format: MessageFormat,
    pub text_content: Option<String>,
    pub media: Option<MediaAttachment>,
    pub reply: Option<ReplySnapshot>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    pub fn text(
        id: MessageId,
        room_id: RoomId,
        sender: &User,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self::build(id, room_id, sender, MessageFormat::Text, Some(content.into()), None, now)
    }

    /// 媒体消息先以空内容落库，附件随后写入
    pub fn media_placeholder(
        id: MessageId,
        room_id: RoomId,
        sender: &User,
        format: MediaFormat,
        now: Timestamp,
    ) -> Self {
        Self::build(id, room_id, sender, format.message_format(), None, None, now)
    }

    pub fn reply(
        id: MessageId,
        room_id: RoomId,
        sender: &User,
        format: MessageFormat,
        content: Option<String>,
        snapshot: ReplySnapshot,
        now: Timestamp,
    ) -> Self {
        Self::build(id, room_id, sender, format, content, Some(snapshot), now)
    }

    fn build(
        id: MessageId,
        room_id: RoomId,
        sender: &User,
        format: MessageFormat,
        text_content: Option<String>,
        reply: Option<ReplySnapshot>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id: sender.id,
            sender_username: sender.username.as_str().to_owned(),
            format,
            text_content,
            media: None,
            reply,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// 被回复时用于快照的内容：媒体消息只给出占位标签，绝不复制二进制数据
    pub fn snapshot_content(&self) -> String {
        match self.format.placeholder() {
            Some(label) => label.to_owned(),
            None => self.text_content.clone().unwrap_or_default(),
        }
    }

    /// 附加媒体只填充附件，消息格式保持创建时的值
    pub fn attach(&mut self, attachment: MediaAttachment, now: Timestamp) {
        self.media = Some(attachment);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Username;
    use uuid::Uuid;

    fn sender(name: &str) -> User {
        User::new(
            UserId::from(Uuid::new_v4()),
            Username::parse(name).unwrap(),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn snapshot_of_media_uses_placeholder() {
        let alice = sender("alice");
        let mut image = Message::media_placeholder(
            MessageId::generate(),
            RoomId::generate(),
            &alice,
            MediaFormat::Image,
            chrono::Utc::now(),
        );
        image.attach(
            MediaAttachment {
                format: MediaFormat::Image,
                filename: "media_1_2.png".into(),
                path: "images/media_1_2.png".into(),
            },
            chrono::Utc::now(),
        );

        let snapshot = ReplySnapshot::capture(&image);
        assert_eq!(snapshot.previous_message_content, "IMAGE");
        assert_eq!(snapshot.previous_sender_username, "alice");
        assert_eq!(snapshot.previous_message_id, image.id);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let bob = sender("bob");
        let mut original = Message::text(
            MessageId::generate(),
            RoomId::generate(),
            &bob,
            "hi",
            chrono::Utc::now(),
        );
        let snapshot = ReplySnapshot::capture(&original);

        original.text_content = Some("edited".into());
        original.sender_username = "robert".into();

        assert_eq!(snapshot.previous_message_content, "hi");
        assert_eq!(snapshot.previous_sender_username, "bob");
    }
}
