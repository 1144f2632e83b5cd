//! 仓储接口
//!
//! 房间、成员、消息的持久化由外部存储负责，核心逻辑只依赖这里的 trait。

use async_trait::async_trait;
use domain::{
    ChatRoom, MediaAttachment, Message, MessageId, RepositoryError, RoomId, Timestamp, User,
    UserId,
};

use crate::media::MediaUpload;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    /// 更新在线状态；重复设置同一状态是幂等的
    async fn set_online(&self, id: UserId, online: bool) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// 创建房间及其初始成员，不触发任何成员变更通知
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError>;
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
    /// 按创建时间倒序列出所有房间
    async fn list(&self) -> Result<Vec<ChatRoom>, RepositoryError>;
    async fn is_member(&self, room_id: &RoomId, user_id: UserId) -> Result<bool, RepositoryError>;
    /// 返回真正新加入的用户
    async fn add_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError>;
    /// 返回真正被移除的用户
    async fn remove_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError>;
    /// 房间内 `is_online = true` 的成员数
    async fn active_member_count(&self, room_id: &RoomId) -> Result<u64, RepositoryError>;
}

/// 历史消息分页游标：严格早于 (created_at, id) 的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: Timestamp,
    pub id: MessageId,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError>;

    /// 创建回复，`message.reply` 必须携带快照
    async fn create_reply(&self, message: Message) -> Result<Message, RepositoryError>;

    /// 原子地写入媒体文件并更新消息记录；失败时不留下半完成状态
    async fn attach_media(
        &self,
        id: &MessageId,
        upload: MediaUpload,
    ) -> Result<MediaAttachment, RepositoryError>;

    /// 删除尚未附加媒体的占位消息（附件写入失败后的补偿）
    async fn discard_message(&self, id: &MessageId) -> Result<(), RepositoryError>;

    async fn get_message(
        &self,
        id: &MessageId,
        room_id: &RoomId,
    ) -> Result<Option<Message>, RepositoryError>;

    /// 按 (created_at, id) 倒序返回最多 `limit` 条消息
    async fn history(
        &self,
        room_id: &RoomId,
        before: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;
}
