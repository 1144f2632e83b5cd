//! 聊天室系统核心领域模型
//!
//! 包含用户、聊天室、消息等核心实体，以及推送给房间的聊天事件。

pub mod chat_room;
pub mod display;
pub mod errors;
pub mod events;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::ChatRoom;
pub use errors::*;
pub use events::*;
pub use message::{MediaAttachment, Message, ReplySnapshot};
pub use user::User;
pub use value_objects::*;
