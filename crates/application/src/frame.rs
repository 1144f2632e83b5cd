//! 客户端入站帧的解码
//!
//! 文本帧是带 `message_type` 的 JSON；二进制帧是 JSON 元数据和原始媒体字节，
//! 中间以固定的 `<delimiter>` 分隔。解码失败只影响当前这一帧。

use std::str::FromStr;

use domain::{MediaFormat, MessageId};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const MEDIA_DELIMITER: &[u8] = b"<delimiter>";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("binary frame has no delimiter")]
    MissingDelimiter,
    #[error("media segment is empty")]
    EmptyPayload,
    #[error("invalid value for `{field}`: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("unknown message_type `{0}`")]
    UnknownMessageType(String),
}

/// 解码后的文本帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFrame {
    Message {
        text: String,
    },
    Reply {
        text: String,
        previous_message_id: MessageId,
    },
    /// `signal` 为 `message` 字段的字符串值，非字符串按 `None` 处理
    Typing {
        signal: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Media,
    Reply { previous_message_id: MessageId },
}

/// 解码后的二进制媒体帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub kind: MediaKind,
    /// 元数据里声明的消息格式，只在它指向某种媒体时有值
    pub message_format: Option<MediaFormat>,
    pub media_format: MediaFormat,
    pub bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct RawTextFrame {
    message_type: Option<String>,
    message: Option<Value>,
    previous_message_id: Option<String>,
}

#[derive(Deserialize)]
struct RawMediaMetadata {
    message_type: Option<String>,
    message_format: Option<String>,
    media_format: Option<String>,
    previous_message_id: Option<String>,
}

pub fn decode_text(raw: &str) -> Result<TextFrame, FrameError> {
    let frame: RawTextFrame =
        serde_json::from_str(raw).map_err(|err| FrameError::InvalidJson(err.to_string()))?;
    let message_type = frame
        .message_type
        .ok_or(FrameError::MissingField("message_type"))?;

    match message_type.as_str() {
        "message" => Ok(TextFrame::Message {
            text: required_text(frame.message)?,
        }),
        "reply" => Ok(TextFrame::Reply {
            text: required_text(frame.message)?,
            previous_message_id: frame
                .previous_message_id
                .map(MessageId::from)
                .ok_or(FrameError::MissingField("previous_message_id"))?,
        }),
        "typing" => Ok(TextFrame::Typing {
            signal: frame
                .message
                .and_then(|value| value.as_str().map(str::to_owned)),
        }),
        _ => Err(FrameError::UnknownMessageType(message_type)),
    }
}

/// 按分隔符切开一次；媒体段为空时在解析元数据之前就返回 `EmptyPayload`
pub fn decode_binary(raw: &[u8]) -> Result<MediaFrame, FrameError> {
    let position = raw
        .windows(MEDIA_DELIMITER.len())
        .position(|window| window == MEDIA_DELIMITER)
        .ok_or(FrameError::MissingDelimiter)?;
    let (metadata, rest) = raw.split_at(position);
    let payload = &rest[MEDIA_DELIMITER.len()..];
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }

    let metadata: RawMediaMetadata = serde_json::from_slice(metadata)
        .map_err(|err| FrameError::InvalidJson(err.to_string()))?;

    let media_format = metadata
        .media_format
        .ok_or(FrameError::MissingField("media_format"))
        .and_then(|value| parse_media_format("media_format", value))?;

    let message_format = metadata
        .message_format
        .and_then(|value| MediaFormat::from_str(&value).ok());

    let message_type = metadata
        .message_type
        .ok_or(FrameError::MissingField("message_type"))?;
    let kind = match message_type.as_str() {
        "media" => MediaKind::Media,
        "reply" => MediaKind::Reply {
            previous_message_id: metadata
                .previous_message_id
                .map(MessageId::from)
                .ok_or(FrameError::MissingField("previous_message_id"))?,
        },
        _ => return Err(FrameError::UnknownMessageType(message_type)),
    };

    Ok(MediaFrame {
        kind,
        message_format,
        media_format,
        bytes: payload.to_vec(),
    })
}

impl MediaFrame {
    /// 回复的格式优先取元数据声明的媒体格式，否则跟随 media_format
    pub fn reply_format(&self) -> MediaFormat {
        self.message_format.unwrap_or(self.media_format)
    }
}

fn required_text(value: Option<Value>) -> Result<String, FrameError> {
    match value {
        Some(Value::String(text)) => Ok(text),
        Some(other) => Err(FrameError::InvalidValue {
            field: "message",
            value: other.to_string(),
        }),
        None => Err(FrameError::MissingField("message")),
    }
}

fn parse_media_format(field: &'static str, value: String) -> Result<MediaFormat, FrameError> {
    MediaFormat::from_str(&value).map_err(|_| FrameError::InvalidValue { field, value })
}
