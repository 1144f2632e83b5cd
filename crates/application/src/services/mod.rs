mod message_service;
mod room_service;

pub use message_service::{MessageService, MessageServiceDependencies};
pub use room_service::{
    decode_cursor, encode_cursor, ChangeMembersRequest, CreateRoomRequest, RoomService,
    RoomServiceDependencies, HISTORY_PAGE_SIZE,
};
