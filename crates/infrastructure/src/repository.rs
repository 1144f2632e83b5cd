use std::str::FromStr;
use std::sync::Arc;

use application::{
    media::{MediaStore, MediaUpload},
    repository::{HistoryCursor, MessageRepository, RoomRepository, UserRepository},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRoom, MediaAttachment, MediaFormat, Message, MessageFormat, MessageId, ReplySnapshot,
    RepositoryError, RoomId, User, UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    let unique = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique {
        RepositoryError::Conflict
    } else {
        RepositoryError::storage(err.to_string())
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    is_online: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(User {
            id: UserId::from(value.id),
            username,
            is_online: value.is_online,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: String,
    room_name: String,
    creator_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    room_id: String,
    user_id: Uuid,
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: String,
    room_id: String,
    sender_id: Uuid,
    sender_username: String,
    message_format: String,
    text_content: Option<String>,
    media_format: Option<String>,
    media_filename: Option<String>,
    media_path: Option<String>,
    is_reply: bool,
    previous_message_id: Option<String>,
    previous_sender_id: Option<Uuid>,
    previous_sender_username: Option<String>,
    previous_message_content: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let format = MessageFormat::from_code(&value.message_format)
            .map_err(|err| invalid_data(err.to_string()))?;

        let media = match (value.media_format, value.media_filename, value.media_path) {
            (Some(media_format), Some(filename), Some(path)) => Some(MediaAttachment {
                format: MediaFormat::from_str(&media_format)
                    .map_err(|err| invalid_data(err.to_string()))?,
                filename,
                path,
            }),
            _ => None,
        };

        let reply = if value.is_reply {
            let (Some(previous_message_id), Some(previous_sender_id)) =
                (value.previous_message_id, value.previous_sender_id)
            else {
                return Err(invalid_data(format!("reply {} has no snapshot", value.id)));
            };
            Some(ReplySnapshot {
                previous_message_id: MessageId::from(previous_message_id),
                previous_sender_id: UserId::from(previous_sender_id),
                previous_sender_username: value.previous_sender_username.unwrap_or_default(),
                previous_message_content: value.previous_message_content.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            sender_username: value.sender_username,
            format,
            text_content: value.text_content,
            media,
            reply,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.room_id, m.sender_id, u.username AS sender_username, m.message_format,
    m.text_content, m.media_format, m.media_filename, m.media_path, m.is_reply,
    m.previous_message_id, m.previous_sender_id, m.previous_sender_username,
    m.previous_message_content, m.created_at, m.updated_at
"#;

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, is_online, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, is_online, created_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.is_online)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, is_online, created_at FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn set_online(&self, id: UserId, online: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(r#"UPDATE users SET is_online = $2 WHERE id = $1"#)
            .bind(Uuid::from(id))
            .bind(online)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_members(&self, records: Vec<RoomRecord>) -> Result<Vec<ChatRoom>, RepositoryError> {
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let members = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id FROM room_members WHERE room_id = ANY($1)"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records
            .into_iter()
            .map(|record| ChatRoom {
                members: members
                    .iter()
                    .filter(|member| member.room_id == record.id)
                    .map(|member| UserId::from(member.user_id))
                    .collect(),
                id: RoomId::from(record.id),
                name: record.room_name,
                creator_id: UserId::from(record.creator_id),
                created_at: record.created_at,
            })
            .collect())
    }

    async fn ensure_exists(&self, room_id: &RoomId) -> Result<(), RepositoryError> {
        let exists: bool = sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1)"#)
            .bind(room_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if exists {
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"INSERT INTO rooms (id, room_name, creator_id, created_at) VALUES ($1, $2, $3, $4)"#,
        )
        .bind(room.id.as_str())
        .bind(&room.name)
        .bind(Uuid::from(room.creator_id))
        .bind(room.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let members: Vec<Uuid> = room.members.iter().copied().map(Uuid::from).collect();
        sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(room.id.as_str())
        .bind(&members)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"SELECT id, room_name, creator_id, created_at FROM rooms WHERE id = $1"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.with_members(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ChatRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"SELECT id, room_name, creator_id, created_at FROM rooms ORDER BY created_at DESC, id DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.with_members(records).await
    }

    async fn is_member(&self, room_id: &RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = $1 AND user_id = $2)"#,
        )
        .bind(room_id.as_str())
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn add_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError> {
        self.ensure_exists(room_id).await?;
        let ids: Vec<Uuid> = user_ids.iter().copied().map(Uuid::from).collect();
        // 不存在的用户被忽略，已是成员的不会出现在返回结果中
        let added: Vec<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO room_members (room_id, user_id)
            SELECT $1, u.id FROM users u WHERE u.id = ANY($2)
            ON CONFLICT DO NOTHING
            RETURNING user_id
            "#,
        )
        .bind(room_id.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(added.into_iter().map(UserId::from).collect())
    }

    async fn remove_members(
        &self,
        room_id: &RoomId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, RepositoryError> {
        self.ensure_exists(room_id).await?;
        let ids: Vec<Uuid> = user_ids.iter().copied().map(Uuid::from).collect();
        let removed: Vec<Uuid> = sqlx::query_scalar(
            r#"DELETE FROM room_members WHERE room_id = $1 AND user_id = ANY($2) RETURNING user_id"#,
        )
        .bind(room_id.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(removed.into_iter().map(UserId::from).collect())
    }

    async fn active_member_count(&self, room_id: &RoomId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM room_members rm
            JOIN users u ON u.id = rm.user_id
            WHERE rm.room_id = $1 AND u.is_online
            "#,
        )
        .bind(room_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count.max(0) as u64)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
    media: Arc<dyn MediaStore>,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool, media: Arc<dyn MediaStore>) -> Self {
        Self { pool, media }
    }

    async fn insert(&self, message: &Message) -> Result<(), RepositoryError> {
        let reply = message.reply.as_ref();
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, room_id, sender_id, message_format, text_content, is_reply,
                previous_message_id, previous_sender_id, previous_sender_username,
                previous_message_content, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(message.id.as_str())
        .bind(message.room_id.as_str())
        .bind(Uuid::from(message.sender_id))
        .bind(message.format.code())
        .bind(message.text_content.as_deref())
        .bind(message.is_reply())
        .bind(reply.map(|r| r.previous_message_id.as_str()))
        .bind(reply.map(|r| Uuid::from(r.previous_sender_id)))
        .bind(reply.map(|r| r.previous_sender_username.as_str()))
        .bind(reply.map(|r| r.previous_message_content.as_str()))
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn fetch(&self, id: &MessageId) -> Result<Message, RepositoryError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id WHERE m.id = $1"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Message::try_from(record)
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
        self.insert(&message).await?;
        self.fetch(&message.id).await
    }

    async fn create_reply(&self, message: Message) -> Result<Message, RepositoryError> {
        if !message.is_reply() {
            return Err(invalid_data("reply without snapshot"));
        }
        self.insert(&message).await?;
        self.fetch(&message.id).await
    }

    async fn attach_media(
        &self,
        id: &MessageId,
        upload: MediaUpload,
    ) -> Result<MediaAttachment, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 锁住目标行，文件写入与行更新一起提交
        let exists: Option<String> =
            sqlx::query_scalar(r#"SELECT id FROM messages WHERE id = $1 FOR UPDATE"#)
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let path = self.media.store(&upload).await?;
        let attachment = MediaAttachment {
            format: upload.format,
            filename: upload.filename,
            path,
        };

        let update = sqlx::query(
            r#"
            UPDATE messages
            SET media_format = $2, media_filename = $3, media_path = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(attachment.format.as_str())
        .bind(&attachment.filename)
        .bind(&attachment.path)
        .execute(&mut *tx)
        .await;

        let committed = match update {
            Ok(_) => tx.commit().await,
            Err(err) => Err(err),
        };

        if let Err(err) = committed {
            tracing::error!(message_id = %id, path = %attachment.path, error = %err, "媒体附件事务回滚");
            if let Err(remove_err) = self.media.remove(&attachment.path).await {
                tracing::error!(path = %attachment.path, error = %remove_err, "清理媒体文件失败");
            }
            return Err(map_sqlx_err(err));
        }
        Ok(attachment)
    }

    async fn discard_message(&self, id: &MessageId) -> Result<(), RepositoryError> {
        sqlx::query(r#"DELETE FROM messages WHERE id = $1 AND media_path IS NULL"#)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_message(
        &self,
        id: &MessageId,
        room_id: &RoomId,
    ) -> Result<Option<Message>, RepositoryError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id \
             WHERE m.id = $1 AND m.room_id = $2"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id.as_str())
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn history(
        &self,
        room_id: &RoomId,
        before: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = match before {
            Some(cursor) => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id \
                     WHERE m.room_id = $1 AND (m.created_at, m.id) < ($2, $3) \
                     ORDER BY m.created_at DESC, m.id DESC LIMIT $4"
                );
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(room_id.as_str())
                    .bind(cursor.created_at)
                    .bind(cursor.id.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id \
                     WHERE m.room_id = $1 ORDER BY m.created_at DESC, m.id DESC LIMIT $2"
                );
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(room_id.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool, media: Arc<dyn MediaStore>) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone(), media)),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
