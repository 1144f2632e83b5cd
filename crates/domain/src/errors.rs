//! 领域模型错误定义
//!
//! 定义了聊天室领域中可能出现的错误类型，以及仓储层统一使用的错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 房间不存在
    #[error("房间不存在")]
    RoomNotFound,

    /// 用户不存在
    #[error("用户不存在")]
    UserNotFound,

    /// 被回复的消息不存在
    #[error("消息不存在")]
    MessageNotFound,

    /// 用户不是房间成员
    #[error("用户不在房间内")]
    UserNotInRoom,
}

impl DomainError {
    /// 创建参数无效错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("记录不存在")]
    NotFound,
    #[error("记录已存在")]
    Conflict,
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
