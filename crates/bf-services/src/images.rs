//! Image attachment helpers shared by thread and reply creation/deletion.
//!
//! Paths encode ownership and upload batch:
//! `forum/threads/{userId}/{batch}_{index}` and
//! `forum/replies/{threadId}/{userId}/{batch}_{index}`, where `batch` is the
//! upload time in milliseconds.

use bf_core::{BlobStore, ImageUpload, Result, ThreadId};
use futures_util::future::{join_all, try_join_all};
use tracing::warn;

pub fn thread_image_path(user_id: &str, batch: i64, index: usize) -> String {
    format!("forum/threads/{user_id}/{batch}_{index}")
}

pub fn reply_image_path(thread_id: ThreadId, user_id: &str, batch: i64, index: usize) -> String {
    format!("forum/replies/{thread_id}/{user_id}/{batch}_{index}")
}

/// Uploads every image concurrently, returning URLs in input order.
/// The first failure fails the whole batch; images already written stay put.
pub(crate) async fn upload_all<F>(blobs: &dyn BlobStore, uploads: Vec<ImageUpload>, path_for: F) -> Result<Vec<String>>
where
    F: Fn(usize) -> String,
{
    if uploads.is_empty() {
        return Ok(Vec::new());
    }

    let pending = uploads.into_iter().enumerate().map(|(index, image)| {
        let path = path_for(index);
        async move { blobs.upload(&path, image.data, &image.content_type).await }
    });

    try_join_all(pending).await
}

/// Best-effort removal. Failures are logged, never retried or surfaced.
pub(crate) async fn delete_all<'a, I>(blobs: &dyn BlobStore, urls: I)
where
    I: IntoIterator<Item = &'a String>,
{
    let pending = urls.into_iter().map(|url| async move {
        if let Err(err) = blobs.delete_by_url(url).await {
            warn!(url = %url, error = %err, "error deleting image");
        }
    });

    join_all(pending).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn paths_encode_owner_and_batch() {
        assert_eq!(thread_image_path("u1", 1700000000000, 0), "forum/threads/u1/1700000000000_0");
        let thread_id = Uuid::nil();
        assert_eq!(
            reply_image_path(thread_id, "u1", 42, 3),
            format!("forum/replies/{thread_id}/u1/42_3")
        );
    }
}
