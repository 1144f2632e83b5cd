//! 房间会话状态机
//!
//! 每个 WebSocket 连接对应一个 `RoomSession`：
//!
//! * `authorize` 完成 CONNECTING 阶段，失败即 REJECTED（`SessionRejection`）。
//! * `subscribe` 把会话登记到房间广播组，标记在线并广播在线人数，进入 SUBSCRIBED。
//! * `receive_text` / `receive_binary` 处理入站帧，单帧失败只记录日志。
//! * `close` 退订、标记离线并重新广播在线人数，进入 CLOSED；重复调用无副作用。
//!   会话未经 `close` 就被丢弃时，同样的清理会在后台任务中执行。

use std::sync::Arc;

use domain::{ChatEvent, ChatRoom, RoomId, User, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    broadcaster::{EventFrame, RoomBroadcaster, SubscriptionId},
    error::ApplicationError,
    frame::{decode_binary, decode_text, FrameError, MediaKind, TextFrame},
    identity::{bearer_token, IdentityVerifier},
    presence::PresenceNotifier,
    repository::{RoomRepository, UserRepository},
    services::MessageService,
};

/// 非房间成员时使用的关闭码
pub const CLOSE_NOT_MEMBER: u16 = 4001;

pub const EMPTY_MEDIA_ERROR: &str = "No file detected or invalid file data.";
pub const MEDIA_SAVE_ERROR: &str = "Failed to save media file.";

/// 连接阶段的拒绝原因
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionRejection {
    #[error("room not found")]
    NotFound,
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("user is not a member of this room")]
    Forbidden,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl SessionRejection {
    /// 需要先接受连接再以关闭码拒绝的情况
    pub fn close_code(&self) -> Option<u16> {
        match self {
            SessionRejection::Forbidden => Some(CLOSE_NOT_MEMBER),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authorized,
    Subscribed,
    Closed,
}

/// 会话依赖的共享组件，所有会话共用同一份
#[derive(Clone)]
pub struct SessionContext {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    pub notifier: Arc<PresenceNotifier>,
    pub messages: Arc<MessageService>,
}

pub struct RoomSession {
    ctx: SessionContext,
    room: ChatRoom,
    user: User,
    state: SessionState,
    subscription: Option<SubscriptionId>,
}

impl RoomSession {
    /// 依次检查房间、凭证、成员资格
    pub async fn authorize(
        ctx: SessionContext,
        room_id: &RoomId,
        authorization: Option<&str>,
    ) -> Result<Self, SessionRejection> {
        let room = ctx
            .rooms
            .find_by_id(room_id)
            .await
            .map_err(|err| SessionRejection::Unavailable(err.to_string()))?
            .ok_or(SessionRejection::NotFound)?;

        let token = bearer_token(authorization).ok_or(SessionRejection::Unauthorized)?;
        let user_id = ctx.verifier.verify(token).await.map_err(|err| {
            tracing::debug!(room_id = %room_id, error = %err, "凭证校验失败");
            SessionRejection::Unauthorized
        })?;
        let user = ctx
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| SessionRejection::Unavailable(err.to_string()))?
            .ok_or(SessionRejection::Unauthorized)?;

        let is_member = ctx
            .rooms
            .is_member(room_id, user.id)
            .await
            .map_err(|err| SessionRejection::Unavailable(err.to_string()))?;
        if !is_member {
            tracing::info!(room_id = %room_id, user_id = %user.id, "非房间成员，拒绝连接");
            return Err(SessionRejection::Forbidden);
        }

        Ok(Self {
            ctx,
            room,
            user,
            state: SessionState::Authorized,
            subscription: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn room(&self) -> &ChatRoom {
        &self.room
    }

    /// 登记到广播组并宣布在线，返回本会话接收事件帧的通道
    pub async fn subscribe(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<EventFrame>, ApplicationError> {
        if self.state != SessionState::Authorized {
            return Err(ApplicationError::Authorization);
        }

        let subscription = self.ctx.broadcaster.subscribe(&self.room.id).await;
        self.subscription = Some(subscription.id);
        self.state = SessionState::Subscribed;

        self.ctx.notifier.set_online(self.user.id, true).await?;
        self.ctx.notifier.announce_active_count(&self.room.id).await?;

        tracing::info!(room_id = %self.room.id, user_id = %self.user.id, "用户进入房间");
        Ok(subscription.receiver)
    }

    /// 处理文本帧；失败只丢弃这一帧
    pub async fn receive_text(&self, raw: &str) {
        if let Err(err) = self.handle_text(raw).await {
            tracing::warn!(
                room_id = %self.room.id,
                user_id = %self.user.id,
                error = %err,
                "丢弃无法处理的文本帧"
            );
        }
    }

    /// 处理二进制帧；失败只丢弃这一帧
    pub async fn receive_binary(&self, raw: &[u8]) {
        if let Err(err) = self.handle_binary(raw).await {
            tracing::warn!(
                room_id = %self.room.id,
                user_id = %self.user.id,
                error = %err,
                "丢弃无法处理的二进制帧"
            );
        }
    }

    pub async fn handle_text(&self, raw: &str) -> Result<(), ApplicationError> {
        self.ensure_subscribed()?;
        let room_id = &self.room.id;

        match decode_text(raw)? {
            TextFrame::Message { text } => {
                self.ctx.messages.send_text(room_id, &self.user, text).await?;
            }
            TextFrame::Reply {
                text,
                previous_message_id,
            } => {
                self.ctx
                    .messages
                    .send_reply(room_id, &self.user, text, &previous_message_id)
                    .await?;
            }
            TextFrame::Typing { signal } => {
                self.ctx
                    .messages
                    .send_typing(room_id, &self.user, signal.as_deref())
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn handle_binary(&self, raw: &[u8]) -> Result<(), ApplicationError> {
        self.ensure_subscribed()?;
        let room_id = &self.room.id;

        let frame = match decode_binary(raw) {
            Ok(frame) => frame,
            Err(FrameError::EmptyPayload) => {
                // 空媒体段：通知整个房间，不再继续处理
                self.ctx
                    .broadcaster
                    .publish(room_id, &ChatEvent::error(EMPTY_MEDIA_ERROR))
                    .await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let reply_format = frame.reply_format();
        let result = match frame.kind {
            MediaKind::Media => {
                self.ctx
                    .messages
                    .send_media(room_id, &self.user, frame.media_format, frame.bytes)
                    .await
            }
            MediaKind::Reply {
                previous_message_id,
            } => {
                self.ctx
                    .messages
                    .send_media_reply(
                        room_id,
                        &self.user,
                        reply_format,
                        frame.media_format,
                        frame.bytes,
                        &previous_message_id,
                    )
                    .await
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(ApplicationError::Repository(err)) => {
                // 存储失败只告知发送者本人
                if let Some(id) = self.subscription {
                    self.ctx
                        .broadcaster
                        .send_to(room_id, id, &ChatEvent::error(MEDIA_SAVE_ERROR))
                        .await?;
                }
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    /// 退订、标记离线、广播在线人数；可重复调用
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous != SessionState::Subscribed {
            return;
        }
        if let Some(id) = self.subscription.take() {
            release(&self.ctx, &self.room.id, self.user.id, id).await;
        }
        tracing::info!(room_id = %self.room.id, user_id = %self.user.id, "用户离开房间");
    }

    fn ensure_subscribed(&self) -> Result<(), ApplicationError> {
        match self.state {
            SessionState::Subscribed => Ok(()),
            _ => Err(ApplicationError::Authorization),
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if self.state != SessionState::Subscribed {
            return;
        }
        let Some(id) = self.subscription.take() else {
            return;
        };
        // 连接任务被取消时仍然要完成清理
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ctx = self.ctx.clone();
                let room_id = self.room.id.clone();
                let user_id = self.user.id;
                handle.spawn(async move {
                    release(&ctx, &room_id, user_id, id).await;
                });
            }
            Err(_) => {
                tracing::warn!(room_id = %self.room.id, user_id = %self.user.id, "运行时已关闭，跳过会话清理");
            }
        }
    }
}

/// 清理的每一步互不依赖，某一步失败不影响后续步骤
async fn release(ctx: &SessionContext, room_id: &RoomId, user_id: UserId, id: SubscriptionId) {
    ctx.broadcaster.unsubscribe(room_id, id).await;

    if let Err(err) = ctx.notifier.set_online(user_id, false).await {
        tracing::error!(room_id = %room_id, user_id = %user_id, error = %err, "更新离线状态失败");
    }
    if let Err(err) = ctx.notifier.announce_active_count(room_id).await {
        tracing::error!(room_id = %room_id, error = %err, "广播在线人数失败");
    }
}
