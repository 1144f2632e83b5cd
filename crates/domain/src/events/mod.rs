//! 领域事件模块
//!
//! 包含推送给房间内所有会话的聊天事件

pub mod chat_event;

pub use chat_event::*;
