//! 媒体文件相关：随机文件名、传输编码，以及按引用存储的媒体仓库接口。

use async_trait::async_trait;
use data_encoding::BASE64;
use domain::{MediaFormat, RepositoryError, Timestamp};
use rand::Rng;

/// 待写入的媒体数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub format: MediaFormat,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// 媒体文件存储，只保存字节并返回引用路径
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// 写入 `{folder}/{filename}`，返回相对路径
    async fn store(&self, upload: &MediaUpload) -> Result<String, RepositoryError>;

    /// 删除已写入的文件；文件不存在时视为成功
    async fn remove(&self, path: &str) -> Result<(), RepositoryError>;
}

/// `media_{毫秒时间戳}_{0..=999999 随机数}.{扩展名}`，随机数不补零
pub fn random_filename(format: MediaFormat, now: Timestamp) -> String {
    let random: u32 = rand::rng().random_range(0..=999_999);
    format!(
        "media_{}_{}.{}",
        now.timestamp_millis(),
        random,
        format.extension()
    )
}

pub fn relative_path(upload: &MediaUpload) -> String {
    format!("{}/{}", upload.format.folder(), upload.filename)
}

/// 推送事件中携带的媒体内容使用 base64 编码，仅用于传输
pub fn encode_for_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_layout() {
        let now = chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let name = random_filename(MediaFormat::Video, now);
        assert!(name.starts_with("media_1700000000123_"));
        assert!(name.ends_with(".mp4"));

        let random = name
            .trim_start_matches("media_1700000000123_")
            .trim_end_matches(".mp4");
        let random: u32 = random.parse().unwrap();
        assert!(random <= 999_999);
    }

    #[test]
    fn transport_encoding_is_standard_base64() {
        assert_eq!(encode_for_transport(b"\x89PNG"), "iVBORw==");
        assert_eq!(encode_for_transport(b""), "");
    }

    #[test]
    fn path_uses_format_folder() {
        let upload = MediaUpload {
            format: MediaFormat::Audio,
            filename: "media_1_000002.wav".into(),
            bytes: vec![1],
        };
        assert_eq!(relative_path(&upload), "audios/media_1_000002.wav");
    }
}
