use std::sync::Arc;

use data_encoding::BASE64URL_NOPAD;
use domain::{ChatRoom, DomainError, MessageId, RepositoryError, RoomId, UserId};

use crate::{
    clock::Clock,
    dto::{HistoryPage, MessageDto},
    error::ApplicationError,
    presence::PresenceNotifier,
    repository::{HistoryCursor, MessageRepository, RoomRepository, UserRepository},
};

/// 历史消息每页条数
pub const HISTORY_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub creator_id: UserId,
    pub room_name: Option<String>,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct ChangeMembersRequest {
    pub room_id: RoomId,
    pub operator_id: UserId, // 操作者（从JWT获取）
    pub user_ids: Vec<UserId>,
}

pub struct RoomServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub notifier: Arc<PresenceNotifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建房间；初始成员直接写入，不发送加入通知，不存在的用户被忽略
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<ChatRoom, ApplicationError> {
        let creator = self
            .deps
            .user_repository
            .find_by_id(request.creator_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let mut members = vec![creator.id];
        for user_id in request.member_ids {
            if members.contains(&user_id) {
                continue;
            }
            if self.deps.user_repository.find_by_id(user_id).await?.is_some() {
                members.push(user_id);
            }
        }

        let room = ChatRoom::new(
            RoomId::generate(),
            request.room_name,
            creator.id,
            members,
            self.deps.clock.now(),
        )?;
        let room = self.deps.room_repository.create(room).await?;

        tracing::info!(
            room_id = %room.id,
            room_name = %room.name,
            creator_id = %creator.id,
            members = room.members.len(),
            "创建聊天室"
        );
        Ok(room)
    }

    pub async fn list_rooms(&self) -> Result<Vec<ChatRoom>, ApplicationError> {
        Ok(self.deps.room_repository.list().await?)
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<ChatRoom, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::RoomNotFound.into())
    }

    /// 加入成员，只对真正新加入的用户发布通知
    pub async fn add_members(
        &self,
        request: ChangeMembersRequest,
    ) -> Result<Vec<UserId>, ApplicationError> {
        self.check_creator(&request.room_id, request.operator_id).await?;
        let added = self
            .deps
            .room_repository
            .add_members(&request.room_id, &request.user_ids)
            .await
            .map_err(room_not_found)?;

        tracing::info!(room_id = %request.room_id, added = added.len(), "房间加入成员");
        self.deps.notifier.members_added(&request.room_id, &added).await?;
        Ok(added)
    }

    /// 移除成员，只对真正被移除的用户发布通知
    pub async fn remove_members(
        &self,
        request: ChangeMembersRequest,
    ) -> Result<Vec<UserId>, ApplicationError> {
        self.check_creator(&request.room_id, request.operator_id).await?;
        let removed = self
            .deps
            .room_repository
            .remove_members(&request.room_id, &request.user_ids)
            .await
            .map_err(room_not_found)?;

        tracing::info!(room_id = %request.room_id, removed = removed.len(), "房间移除成员");
        self.deps
            .notifier
            .members_removed(&request.room_id, &removed)
            .await?;
        Ok(removed)
    }

    /// 倒序分页读取历史消息，`cursor` 为上一页返回的 `previous_messages`
    pub async fn history(
        &self,
        room_id: &RoomId,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, ApplicationError> {
        self.get_room(room_id).await?;
        let before = cursor.map(decode_cursor).transpose()?;

        // 多取一条判断是否还有更早的消息
        let mut messages = self
            .deps
            .message_repository
            .history(room_id, before, HISTORY_PAGE_SIZE + 1)
            .await?;
        let has_more = messages.len() > HISTORY_PAGE_SIZE;
        messages.truncate(HISTORY_PAGE_SIZE);

        let previous_messages = if has_more {
            messages.last().map(|last| {
                encode_cursor(&HistoryCursor {
                    created_at: last.created_at,
                    id: last.id.clone(),
                })
            })
        } else {
            None
        };

        Ok(HistoryPage {
            results: messages.iter().map(MessageDto::from).collect(),
            previous_messages,
        })
    }

    async fn check_creator(&self, room_id: &RoomId, operator_id: UserId) -> Result<(), ApplicationError> {
        let room = self.get_room(room_id).await?;
        if room.creator_id != operator_id {
            return Err(ApplicationError::Authorization);
        }
        Ok(())
    }
}

fn room_not_found(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => DomainError::RoomNotFound.into(),
        other => other.into(),
    }
}

/// 游标格式：base64url(`{微秒时间戳}:{消息id}`)
pub fn encode_cursor(cursor: &HistoryCursor) -> String {
    let raw = format!("{}:{}", cursor.created_at.timestamp_micros(), cursor.id);
    BASE64URL_NOPAD.encode(raw.as_bytes())
}

pub fn decode_cursor(value: &str) -> Result<HistoryCursor, ApplicationError> {
    let invalid = || DomainError::invalid_argument("cursor", "malformed cursor");

    let raw = BASE64URL_NOPAD
        .decode(value.as_bytes())
        .map_err(|_| invalid())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid())?;
    let (micros, id) = raw.split_once(':').ok_or_else(invalid)?;
    let micros: i64 = micros.parse().map_err(|_| invalid())?;
    let created_at = chrono::DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;
    if id.is_empty() {
        return Err(invalid().into());
    }

    Ok(HistoryCursor {
        created_at,
        id: MessageId::from(id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::RoomBroadcaster;
    use crate::clock::FixedClock;
    use crate::local_broadcast::LocalRoomBroadcaster;
    use crate::memory::InMemoryStorage;
    use chrono::{Duration, TimeZone, Utc};
    use domain::{Message, User, Username};
    use serde_json::Value;
    use uuid::Uuid;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        bus: Arc<LocalRoomBroadcaster>,
        service: RoomService,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::default());
        let bus = Arc::new(LocalRoomBroadcaster::new());
        let notifier = Arc::new(PresenceNotifier::new(
            storage.clone(),
            storage.clone(),
            bus.clone(),
        ));
        let service = RoomService::new(RoomServiceDependencies {
            user_repository: storage.clone(),
            room_repository: storage.clone(),
            message_repository: storage.clone(),
            notifier,
            clock: Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap())),
        });
        Fixture {
            storage,
            bus,
            service,
        }
    }

    async fn user(storage: &InMemoryStorage, name: &str) -> User {
        let user = User::new(
            UserId::from(Uuid::new_v4()),
            Username::parse(name).unwrap(),
            Utc::now(),
        );
        UserRepository::create(storage, user).await.unwrap()
    }

    #[tokio::test]
    async fn create_room_includes_creator_and_skips_unknown_members() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let bob = user(&f.storage, "bob").await;

        let room = f
            .service
            .create_room(CreateRoomRequest {
                creator_id: alice.id,
                room_name: None,
                member_ids: vec![bob.id, UserId::from(Uuid::new_v4()), alice.id],
            })
            .await
            .unwrap();

        assert!(room.name.starts_with("room-"));
        assert_eq!(room.members.len(), 2);
        assert!(room.is_member(alice.id) && room.is_member(bob.id));
    }

    #[tokio::test]
    async fn add_members_notifies_only_new_members() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let bob = user(&f.storage, "bob").await;
        let room = f
            .service
            .create_room(CreateRoomRequest {
                creator_id: alice.id,
                room_name: Some("test".into()),
                member_ids: vec![],
            })
            .await
            .unwrap();
        let mut sub = f.bus.subscribe(&room.id).await;

        let added = f
            .service
            .add_members(ChangeMembersRequest {
                room_id: room.id.clone(),
                operator_id: alice.id,
                user_ids: vec![bob.id, alice.id],
            })
            .await
            .unwrap();
        assert_eq!(added, vec![bob.id]);

        let event: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(event["content"], "bob joined the chat.");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_room_name_conflicts() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let request = CreateRoomRequest {
            creator_id: alice.id,
            room_name: Some("test".into()),
            member_ids: vec![],
        };
        f.service.create_room(request.clone()).await.unwrap();
        let err = f.service.create_room(request).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Repository(RepositoryError::Conflict)));
    }

    #[tokio::test]
    async fn only_creator_changes_members() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let bob = user(&f.storage, "bob").await;
        let room = f
            .service
            .create_room(CreateRoomRequest {
                creator_id: alice.id,
                room_name: None,
                member_ids: vec![bob.id],
            })
            .await
            .unwrap();

        let err = f
            .service
            .remove_members(ChangeMembersRequest {
                room_id: room.id.clone(),
                operator_id: bob.id,
                user_ids: vec![alice.id],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Authorization));

        let removed = f
            .service
            .remove_members(ChangeMembersRequest {
                room_id: room.id,
                operator_id: alice.id,
                user_ids: vec![bob.id],
            })
            .await
            .unwrap();
        assert_eq!(removed, vec![bob.id]);
    }

    #[tokio::test]
    async fn missing_room_is_reported() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let err = f
            .service
            .add_members(ChangeMembersRequest {
                room_id: RoomId::from("missing"),
                operator_id: alice.id,
                user_ids: vec![alice.id],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::RoomNotFound)));
    }

    #[tokio::test]
    async fn history_is_paginated_newest_first() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let room = f
            .service
            .create_room(CreateRoomRequest {
                creator_id: alice.id,
                room_name: None,
                member_ids: vec![],
            })
            .await
            .unwrap();

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        for n in 0..13 {
            let message = Message::text(
                MessageId::generate(),
                room.id.clone(),
                &alice,
                format!("#{n}"),
                base + Duration::minutes(n),
            );
            f.storage.create_message(message).await.unwrap();
        }

        let first = f.service.history(&room.id, None).await.unwrap();
        assert_eq!(first.results.len(), HISTORY_PAGE_SIZE);
        assert_eq!(first.results[0].text_content.as_deref(), Some("#12"));
        let cursor = first.previous_messages.expect("older page");

        let second = f.service.history(&room.id, Some(&cursor)).await.unwrap();
        let texts: Vec<_> = second
            .results
            .iter()
            .filter_map(|m| m.text_content.as_deref())
            .collect();
        assert_eq!(texts, ["#2", "#1", "#0"]);
        assert!(second.previous_messages.is_none());
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let f = fixture();
        let alice = user(&f.storage, "alice").await;
        let room = f
            .service
            .create_room(CreateRoomRequest {
                creator_id: alice.id,
                room_name: None,
                member_ids: vec![],
            })
            .await
            .unwrap();

        let err = f.service.history(&room.id, Some("!!")).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn cursor_round_trip() {
        let cursor = HistoryCursor {
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            id: MessageId::from("abc_-123"),
        };
        assert_eq!(decode_cursor(&encode_cursor(&cursor)).unwrap(), cursor);
    }
}
