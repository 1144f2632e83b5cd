//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：房间会话状态机、入站帧解码、
//! 房间广播总线、在线状态通知，以及对外部存储和身份校验的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod frame;
pub mod identity;
pub mod local_broadcast;
pub mod media;
pub mod memory;
pub mod presence;
pub mod repository;
pub mod services;
pub mod session;

pub use broadcaster::{BroadcastError, EventFrame, RoomBroadcaster, Subscription, SubscriptionId};
pub use clock::{Clock, SystemClock};
pub use dto::{HistoryPage, MessageDto, RoomDto, UserDto};
pub use error::{ApplicationError, ApplicationResult};
pub use frame::{FrameError, MEDIA_DELIMITER};
pub use identity::{bearer_token, IdentityVerifier};
pub use local_broadcast::LocalRoomBroadcaster;
pub use media::{MediaStore, MediaUpload};
pub use memory::{InMemoryMediaStore, InMemoryStorage};
pub use presence::PresenceNotifier;
pub use repository::{HistoryCursor, MessageRepository, RoomRepository, UserRepository};
pub use services::{
    ChangeMembersRequest, CreateRoomRequest, MessageService, MessageServiceDependencies,
    RoomService, RoomServiceDependencies,
};
pub use session::{RoomSession, SessionContext, SessionRejection, SessionState, CLOSE_NOT_MEMBER};
