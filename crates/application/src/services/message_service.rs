//! 消息处理服务
//!
//! 持久化文本、回复、媒体消息，并把结果广播给房间内的所有会话（包括发送者）。
//! 媒体消息按 "建行 → 原子附加 → 广播" 的顺序处理，客户端不会看到尚未写入的媒体。

use std::sync::Arc;

use domain::{
    ChatEvent, DomainError, MediaAttachment, MediaFormat, Message, MessageFormat, MessageId,
    ReplySnapshot, RoomId, User,
};

use crate::{
    broadcaster::RoomBroadcaster,
    clock::Clock,
    error::ApplicationError,
    media::{encode_for_transport, random_filename, MediaUpload},
    repository::MessageRepository,
};

pub struct MessageServiceDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// 空文本直接忽略，不落库也不广播
    pub async fn send_text(
        &self,
        room_id: &RoomId,
        sender: &User,
        text: String,
    ) -> Result<Option<Message>, ApplicationError> {
        if text.is_empty() {
            return Ok(None);
        }

        let message = Message::text(
            MessageId::generate(),
            room_id.clone(),
            sender,
            text,
            self.deps.clock.now(),
        );
        let message = self.deps.message_repository.create_message(message).await?;
        self.deps
            .broadcaster
            .publish(room_id, &ChatEvent::message(&message))
            .await?;

        tracing::debug!(room_id = %room_id, message_id = %message.id, "发送文本消息");
        Ok(Some(message))
    }

    pub async fn send_reply(
        &self,
        room_id: &RoomId,
        sender: &User,
        text: String,
        previous_message_id: &MessageId,
    ) -> Result<Option<Message>, ApplicationError> {
        if text.is_empty() {
            return Ok(None);
        }

        let snapshot = self.snapshot(room_id, previous_message_id).await?;
        let reply = Message::reply(
            MessageId::generate(),
            room_id.clone(),
            sender,
            MessageFormat::Text,
            Some(text),
            snapshot.clone(),
            self.deps.clock.now(),
        );
        let reply = self.deps.message_repository.create_reply(reply).await?;
        self.deps
            .broadcaster
            .publish(room_id, &ChatEvent::text_reply(&reply, &snapshot))
            .await?;

        tracing::debug!(
            room_id = %room_id,
            message_id = %reply.id,
            previous_message_id = %previous_message_id,
            "发送回复"
        );
        Ok(Some(reply))
    }

    /// 只有 `signal` 恰好为 "typing" 时事件才带状态文本
    pub async fn send_typing(
        &self,
        room_id: &RoomId,
        sender: &User,
        signal: Option<&str>,
    ) -> Result<(), ApplicationError> {
        self.deps
            .broadcaster
            .publish(room_id, &ChatEvent::typing(sender.username.as_str(), signal))
            .await?;
        Ok(())
    }

    pub async fn send_media(
        &self,
        room_id: &RoomId,
        sender: &User,
        media_format: MediaFormat,
        bytes: Vec<u8>,
    ) -> Result<Message, ApplicationError> {
        let now = self.deps.clock.now();
        let placeholder =
            Message::media_placeholder(MessageId::generate(), room_id.clone(), sender, media_format, now);
        let mut message = self
            .deps
            .message_repository
            .create_message(placeholder)
            .await?;

        let content = encode_for_transport(&bytes);
        let upload = MediaUpload {
            format: media_format,
            filename: random_filename(media_format, now),
            bytes,
        };
        let attachment = self.attach_or_discard(&message.id, upload).await?;

        self.deps
            .broadcaster
            .publish(
                room_id,
                &ChatEvent::media(&message, content, media_format, attachment.filename.clone()),
            )
            .await?;

        tracing::debug!(
            room_id = %room_id,
            message_id = %message.id,
            media_format = %media_format,
            path = %attachment.path,
            "发送媒体消息"
        );
        message.attach(attachment, self.deps.clock.now());
        Ok(message)
    }

    /// `reply_format` 决定回复的消息格式，`media_format` 决定文件的类型和存放位置
    pub async fn send_media_reply(
        &self,
        room_id: &RoomId,
        sender: &User,
        reply_format: MediaFormat,
        media_format: MediaFormat,
        bytes: Vec<u8>,
        previous_message_id: &MessageId,
    ) -> Result<Message, ApplicationError> {
        let snapshot = self.snapshot(room_id, previous_message_id).await?;
        let now = self.deps.clock.now();
        let reply = Message::reply(
            MessageId::generate(),
            room_id.clone(),
            sender,
            reply_format.message_format(),
            None,
            snapshot.clone(),
            now,
        );
        let mut reply = self.deps.message_repository.create_reply(reply).await?;

        let content = encode_for_transport(&bytes);
        let upload = MediaUpload {
            format: media_format,
            filename: random_filename(media_format, now),
            bytes,
        };
        let attachment = self.attach_or_discard(&reply.id, upload).await?;

        self.deps
            .broadcaster
            .publish(
                room_id,
                &ChatEvent::media_reply(
                    &reply,
                    &snapshot,
                    content,
                    media_format,
                    attachment.filename.clone(),
                ),
            )
            .await?;

        tracing::debug!(
            room_id = %room_id,
            message_id = %reply.id,
            previous_message_id = %previous_message_id,
            "发送媒体回复"
        );
        reply.attach(attachment, self.deps.clock.now());
        Ok(reply)
    }

    /// 被回复的消息必须属于同一房间
    async fn snapshot(
        &self,
        room_id: &RoomId,
        previous_message_id: &MessageId,
    ) -> Result<ReplySnapshot, ApplicationError> {
        let original = self
            .deps
            .message_repository
            .get_message(previous_message_id, room_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        Ok(ReplySnapshot::capture(&original))
    }

    /// 附加失败时删除占位消息，错误原样返回
    async fn attach_or_discard(
        &self,
        message_id: &MessageId,
        upload: MediaUpload,
    ) -> Result<MediaAttachment, ApplicationError> {
        match self
            .deps
            .message_repository
            .attach_media(message_id, upload)
            .await
        {
            Ok(attachment) => Ok(attachment),
            Err(err) => {
                tracing::error!(message_id = %message_id, error = %err, "媒体写入失败");
                if let Err(discard_err) = self.deps.message_repository.discard_message(message_id).await {
                    tracing::error!(
                        message_id = %message_id,
                        error = %discard_err,
                        "删除占位消息失败"
                    );
                }
                Err(err.into())
            }
        }
    }
}
