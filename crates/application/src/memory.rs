//! 进程内存储
//!
//! 未配置数据库时使用，同时也是各层测试的默认存储。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatRoom, MediaAttachment, Message, MessageId, RepositoryError, RoomId, User, UserId,
};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::media::{relative_path, MediaStore, MediaUpload};
use crate::repository::{HistoryCursor, MessageRepository, RoomRepository, UserRepository};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, ChatRoom>,
    messages: HashMap<MessageId, Message>,
}

impl State {
    /// 发送者名称以用户当前记录为准
    fn resolve(&self, mut message: Message) -> Message {
        if let Some(user) = self.users.get(&message.sender_id) {
            message.sender_username = user.username.as_str().to_owned();
        }
        message
    }
}

pub struct InMemoryStorage {
    state: RwLock<State>,
    media: Arc<dyn MediaStore>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStorage {
    pub fn new(media: Arc<dyn MediaStore>) -> Self {
        Self::with_clock(media, Arc::new(SystemClock))
    }

    pub fn with_clock(media: Arc<dyn MediaStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            media,
            clock,
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryMediaStore::default()))
    }
}

#[async_trait]
impl UserRepository for InMemoryStorage {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        let taken = state
            .users
            .values()
            .any(|existing| existing.id == user.id || existing.username == user.username);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn set_online(&self, id: UserId, online: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.set_online(online);
        Ok(())
    }
}

#[async_trait]
impl RoomRepository for InMemoryStorage {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let mut state = self.state.write().await;
        let taken = state
            .rooms
            .values()
            .any(|existing| existing.id == room.id || existing.name == room.name);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        state.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        Ok(self.state.read().await.rooms.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ChatRoom>, RepositoryError> {
        let mut rooms: Vec<ChatRoom> = self.state.read().await.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rooms)
    }

    async fn is_member(&self, room_id: &RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|room| room.is_member(user_id)))
    }

    async fn add_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError> {
        let mut state = self.state.write().await;
        let known: Vec<UserId> = user_ids
            .iter()
            .copied()
            .filter(|id| state.users.contains_key(id))
            .collect();
        let room = state.rooms.get_mut(room_id).ok_or(RepositoryError::NotFound)?;
        Ok(known
            .into_iter()
            .filter(|id| room.add_member(*id))
            .collect())
    }

    async fn remove_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError> {
        let mut state = self.state.write().await;
        let room = state.rooms.get_mut(room_id).ok_or(RepositoryError::NotFound)?;
        Ok(user_ids
            .iter()
            .copied()
            .filter(|id| room.remove_member(*id))
            .collect())
    }

    async fn active_member_count(&self, room_id: &RoomId) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        let Some(room) = state.rooms.get(room_id) else {
            return Ok(0);
        };
        let online = room
            .members
            .iter()
            .filter(|id| state.users.get(id).is_some_and(|user| user.is_online))
            .count();
        Ok(online as u64)
    }
}

#[async_trait]
impl MessageRepository for InMemoryStorage {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.rooms.contains_key(&message.room_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        state.messages.insert(message.id.clone(), message.clone());
        Ok(state.resolve(message))
    }

    async fn create_reply(&self, message: Message) -> Result<Message, RepositoryError> {
        if !message.is_reply() {
            return Err(RepositoryError::storage("reply without snapshot"));
        }
        self.create_message(message).await
    }

    async fn attach_media(
        &self,
        id: &MessageId,
        upload: MediaUpload,
    ) -> Result<MediaAttachment, RepositoryError> {
        if !self.state.read().await.messages.contains_key(id) {
            return Err(RepositoryError::NotFound);
        }

        // 写文件期间不持有状态锁，其他房间的读写不受影响
        let path = self.media.store(&upload).await?;
        let attachment = MediaAttachment {
            format: upload.format,
            filename: upload.filename,
            path,
        };

        let attached = match self.state.write().await.messages.get_mut(id) {
            Some(message) => {
                message.attach(attachment.clone(), self.clock.now());
                true
            }
            None => false,
        };
        if !attached {
            // 写文件期间记录已被删除
            if let Err(err) = self.media.remove(&attachment.path).await {
                tracing::error!(path = %attachment.path, error = %err, "清理媒体文件失败");
            }
            return Err(RepositoryError::NotFound);
        }
        Ok(attachment)
    }

    async fn discard_message(&self, id: &MessageId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.messages.get(id).is_some_and(|message| message.media.is_none()) {
            state.messages.remove(id);
        }
        Ok(())
    }

    async fn get_message(
        &self,
        id: &MessageId,
        room_id: &RoomId,
    ) -> Result<Option<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(id)
            .filter(|message| &message.room_id == room_id)
            .cloned()
            .map(|message| state.resolve(message)))
    }

    async fn history(
        &self,
        room_id: &RoomId,
        before: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|message| &message.room_id == room_id)
            .filter(|message| match &before {
                Some(cursor) => {
                    (message.created_at, &message.id) < (cursor.created_at, &cursor.id)
                }
                None => true,
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        messages.truncate(limit);
        Ok(messages
            .into_iter()
            .map(|message| state.resolve(message))
            .collect())
    }
}

/// 把媒体字节保存在内存里的 `MediaStore`
#[derive(Default)]
pub struct InMemoryMediaStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryMediaStore {
    pub async fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn store(&self, upload: &MediaUpload) -> Result<String, RepositoryError> {
        let path = relative_path(upload);
        self.files
            .write()
            .await
            .insert(path.clone(), upload.bytes.clone());
        Ok(path)
    }

    async fn remove(&self, path: &str) -> Result<(), RepositoryError> {
        self.files.write().await.remove(path);
        Ok(())
    }
}
