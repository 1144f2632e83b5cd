use std::sync::Arc;

use application::{
    Clock, IdentityVerifier, LocalRoomBroadcaster, MessageRepository, MessageService,
    MessageServiceDependencies, PresenceNotifier, RoomBroadcaster, RoomRepository, RoomService,
    RoomServiceDependencies, SessionContext, UserRepository,
};

use crate::JwtService;

/// 存储后端提供的三类仓储
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

#[derive(Clone)]
pub struct AppState {
    pub room_service: Arc<RoomService>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: SessionContext,
    pub jwt_service: Arc<JwtService>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// 广播总线在这里创建，所有会话共享同一个实例
    pub fn new(repositories: Repositories, jwt_service: Arc<JwtService>, clock: Arc<dyn Clock>) -> Self {
        let broadcaster: Arc<dyn RoomBroadcaster> = Arc::new(LocalRoomBroadcaster::new());
        let notifier = Arc::new(PresenceNotifier::new(
            repositories.users.clone(),
            repositories.rooms.clone(),
            broadcaster.clone(),
        ));

        let room_service = Arc::new(RoomService::new(RoomServiceDependencies {
            user_repository: repositories.users.clone(),
            room_repository: repositories.rooms.clone(),
            message_repository: repositories.messages.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        }));
        let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
            message_repository: repositories.messages,
            broadcaster: broadcaster.clone(),
            clock: clock.clone(),
        }));

        let verifier: Arc<dyn IdentityVerifier> = jwt_service.clone();
        let sessions = SessionContext {
            users: repositories.users.clone(),
            rooms: repositories.rooms,
            verifier,
            broadcaster,
            notifier,
            messages: message_service,
        };

        Self {
            room_service,
            users: repositories.users,
            sessions,
            jwt_service,
            clock,
        }
    }
}
