use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = chrono::DateTime<chrono::Utc>;

const SHORT_ID_ALPHABET: &[u8] =
    b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 生成 URL 安全的随机短 ID。
pub fn short_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SHORT_ID_ALPHABET[rng.random_range(0..SHORT_ID_ALPHABET.len())] as char)
        .collect()
}

/// 用户唯一标识，由外部认证服务签发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<UserId> for Uuid {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// 聊天室唯一标识（21 位短 ID）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    pub const LEN: usize = 21;

    pub fn generate() -> Self {
        Self(short_id(Self::LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// 消息唯一标识（21 位短 ID）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub const LEN: usize = 21;

    pub fn generate() -> Self {
        Self(short_id(Self::LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// 经过验证的用户名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }
        if value.len() > 120 {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 持久化的消息格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageFormat {
    #[serde(rename = "TXT")]
    Text,
    #[serde(rename = "IMG")]
    Image,
    #[serde(rename = "AUD")]
    Audio,
    #[serde(rename = "VID")]
    Video,
}

impl MessageFormat {
    /// 存储层使用的三字母编码
    pub fn code(self) -> &'static str {
        match self {
            Self::Text => "TXT",
            Self::Image => "IMG",
            Self::Audio => "AUD",
            Self::Video => "VID",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, DomainError> {
        match code {
            "TXT" => Ok(Self::Text),
            "IMG" => Ok(Self::Image),
            "AUD" => Ok(Self::Audio),
            "VID" => Ok(Self::Video),
            other => Err(DomainError::invalid_argument(
                "message_format",
                format!("unknown code {other}"),
            )),
        }
    }

    /// 非文本消息被回复时展示的占位标签
    pub fn placeholder(self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Image => Some("IMAGE"),
            Self::Audio => Some("AUDIO"),
            Self::Video => Some("VIDEO"),
        }
    }

    pub fn is_media(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// 二进制帧携带的媒体类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Image,
    Audio,
    Video,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Audio => "wav",
            Self::Video => "mp4",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Audio => "audio/wav",
            Self::Video => "video/mp4",
        }
    }

    /// 媒体文件的存储目录
    pub fn folder(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Audio => "audios",
            Self::Video => "videos",
        }
    }

    pub fn message_format(self) -> MessageFormat {
        match self {
            Self::Image => MessageFormat::Image,
            Self::Audio => MessageFormat::Audio,
            Self::Video => MessageFormat::Video,
        }
    }
}

impl FromStr for MediaFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(DomainError::invalid_argument(
                "media_format",
                format!("unsupported media format {other}"),
            )),
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
