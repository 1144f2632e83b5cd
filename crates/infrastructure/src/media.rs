//! 本地文件系统上的媒体存储。

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use application::media::{relative_path, MediaStore, MediaUpload};
use async_trait::async_trait;
use domain::RepositoryError;

/// 把媒体写到 `{root}/{images|audios|videos}/{filename}`
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 相对路径只允许普通的路径段
    fn resolve(&self, relative: &str) -> Result<PathBuf, RepositoryError> {
        let relative = Path::new(relative);
        let plain = relative
            .components()
            .all(|component| matches!(component, std::path::Component::Normal(_)));
        if !plain {
            return Err(RepositoryError::storage(format!(
                "非法的媒体路径: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn store(&self, upload: &MediaUpload) -> Result<String, RepositoryError> {
        let relative = relative_path(upload);
        let target = self.resolve(&relative)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RepositoryError::storage(err.to_string()))?;
        }
        if let Err(err) = tokio::fs::write(&target, &upload.bytes).await {
            // 写到一半失败时不留下残缺文件
            if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                if remove_err.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %target.display(), error = %remove_err, "清理残缺媒体文件失败");
                }
            }
            return Err(RepositoryError::storage(err.to_string()));
        }

        tracing::debug!(path = %target.display(), size = upload.bytes.len(), "媒体文件已写入");
        Ok(relative)
    }

    async fn remove(&self, path: &str) -> Result<(), RepositoryError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RepositoryError::storage(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MediaFormat;

    fn upload(format: MediaFormat, filename: &str) -> MediaUpload {
        MediaUpload {
            format,
            filename: filename.to_owned(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[tokio::test]
    async fn stores_under_format_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());

        let path = store
            .store(&upload(MediaFormat::Image, "media_1_000001.png"))
            .await
            .unwrap();

        assert_eq!(path, "images/media_1_000001.png");
        let written = tokio::fs::read(dir.path().join(&path)).await.unwrap();
        assert_eq!(written, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());
        let path = store
            .store(&upload(MediaFormat::Audio, "media_2_000002.wav"))
            .await
            .unwrap();

        store.remove(&path).await.unwrap();
        assert!(!dir.path().join(&path).exists());
        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());
        let filename = format!("{}.png", "x".repeat(300));

        let err = store
            .store(&upload(MediaFormat::Image, &filename))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage { .. }));

        let mut entries = tokio::fs::read_dir(dir.path().join("images")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());

        let err = store.remove("../outside.png").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Storage { .. }));

        let err = store
            .store(&upload(MediaFormat::Video, "../../escape.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage { .. }));
    }
}
