//! # bf-storage-local
//!
//! Local filesystem implementation of `BlobStore`.
//! Objects live at `{root}/{path}` and are served from `{url_prefix}/{path}`,
//! so a URL decodes back to its path by stripping the prefix.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bf_core::{BlobStore, ForumError, Result};
use bytes::Bytes;
use mime::Mime;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct LocalBlobStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/static/uploads")
    url_prefix: String,
}

fn io_error(context: &str, err: std::io::Error) -> ForumError {
    ForumError::Transient(format!("{context}: {err}"))
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            root_path: root,
            url_prefix,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url_prefix, path)
    }

    /// Decodes a public URL back to the object path it was stored under.
    pub fn path_from_url<'a>(&self, url: &'a str) -> Result<&'a str> {
        let path = url
            .strip_prefix(self.url_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ForumError::Validation(format!("'{url}' is not served by this store")))?;
        // Drop any query string a CDN may have appended.
        Ok(path.split('?').next().unwrap_or(path))
    }

    /// Maps an object path onto the filesystem, refusing anything that would
    /// escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ForumError::Validation(format!("invalid object path '{path}'")));
        }
        Ok(self.root_path.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, data: Bytes, content_type: &Mime) -> Result<String> {
        let target_path = self.resolve(path)?;

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("creating upload directory", e))?;
        }
        // Never overwrite: deleting one owner's object must not remove another's.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    ForumError::Conflict(format!("object '{path}' already exists"))
                }
                _ => io_error("creating upload", e),
            })?;
        file.write_all(&data)
            .await
            .map_err(|e| io_error("writing upload", e))?;
        file.flush().await.map_err(|e| io_error("writing upload", e))?;

        debug!(path, bytes = data.len(), content_type = %content_type, "image stored");
        Ok(self.url_for(path))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let path = self.path_from_url(url)?;
        let target_path = self.resolve(path)?;
        fs::remove_file(&target_path)
            .await
            .map_err(|e| io_error("removing upload", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalBlobStore {
        LocalBlobStore::new(dir.path().to_path_buf(), "/static/uploads/")
    }

    #[tokio::test]
    async fn upload_then_delete_by_url() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let url = store
            .upload("forum/threads/u1/1700_0", Bytes::from_static(b"png"), &mime::IMAGE_PNG)
            .await
            .unwrap();
        assert_eq!(url, "/static/uploads/forum/threads/u1/1700_0");

        let on_disk = dir.path().join("forum/threads/u1/1700_0");
        assert_eq!(std::fs::read(&on_disk).unwrap(), b"png");

        store.delete_by_url(&url).await.unwrap();
        assert!(!on_disk.exists());
    }

    #[test]
    fn foreign_urls_and_traversal_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.path_from_url("https://elsewhere.test/a.png").is_err());
        assert_eq!(
            store.path_from_url("/static/uploads/forum/a_0?token=x").unwrap(),
            "forum/a_0"
        );
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/abs").is_err());
    }

    #[tokio::test]
    async fn existing_objects_are_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = "forum/threads/u1/1700_0";

        store.upload(path, Bytes::from_static(b"first"), &mime::IMAGE_PNG).await.unwrap();
        let err = store
            .upload(path, Bytes::from_static(b"second"), &mime::IMAGE_PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, ForumError::Conflict(_)));
        assert_eq!(std::fs::read(dir.path().join(path)).unwrap(), b"first");
    }

    #[tokio::test]
    async fn deleting_a_missing_object_fails() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).delete_by_url("/static/uploads/forum/none").await.unwrap_err();
        assert!(matches!(err, ForumError::Transient(_)));
    }
}
