//! Shared fixtures for the integration tests.

use std::sync::Arc;

use bf_core::{BlobStore, Category, ForumRepo, Reply, Role, Thread, ThreadId, User, VoteTally};
use bf_db_memory::MemoryForumRepo;
use bf_db_sqlite::SqliteForumRepo;
use bf_services::ForumService;
use bf_storage_local::LocalBlobStore;
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

pub const UPLOAD_PREFIX: &str = "/static/uploads";

pub fn member(id: &str) -> User {
    User {
        id: id.to_string(),
        display_name: Some(id.to_uppercase()),
        avatar_url: None,
        role: Role::Member,
    }
}

pub fn admin(id: &str) -> User {
    User {
        role: Role::Admin,
        ..member(id)
    }
}

/// Every store implementation, freshly created.
pub async fn stores() -> Vec<(&'static str, Arc<dyn ForumRepo>)> {
    let sqlite = SqliteForumRepo::new("sqlite::memory:")
        .await
        .expect("in-memory sqlite opens");
    vec![
        ("memory", Arc::new(MemoryForumRepo::new()) as Arc<dyn ForumRepo>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn ForumRepo>),
    ]
}

pub fn blobs(dir: &TempDir) -> Arc<dyn BlobStore> {
    Arc::new(LocalBlobStore::new(dir.path().to_path_buf(), UPLOAD_PREFIX))
}

/// One service per store, all sharing a blob directory under `dir`.
pub async fn services(dir: &TempDir) -> Vec<(&'static str, ForumService)> {
    stores()
        .await
        .into_iter()
        .map(|(name, repo)| (name, ForumService::new(repo, blobs(dir))))
        .collect()
}

/// Filesystem path of an uploaded object given its public URL.
pub fn upload_path(dir: &TempDir, url: &str) -> std::path::PathBuf {
    let relative = url
        .strip_prefix(UPLOAD_PREFIX)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(url);
    dir.path().join(relative)
}

/// A stored thread as a mocked store would return it.
pub fn thread_fixture(author_id: &str, category: Category) -> Thread {
    let now = Utc::now();
    Thread {
        id: Uuid::now_v7(),
        title: "Fixture".to_string(),
        content: "Fixture content".to_string(),
        author_id: author_id.to_string(),
        author_name: author_id.to_uppercase(),
        author_avatar: None,
        category,
        tags: Default::default(),
        is_pinned: false,
        is_locked: false,
        view_count: 0,
        reply_count: 0,
        votes: VoteTally::default(),
        images: Vec::new(),
        created_at: now,
        updated_at: now,
        last_activity_at: now,
    }
}

/// A stored reply as a mocked store would return it.
pub fn reply_fixture(thread_id: ThreadId, author_id: &str) -> Reply {
    let now = Utc::now();
    Reply {
        id: Uuid::now_v7(),
        thread_id,
        content: "Fixture reply".to_string(),
        author_id: author_id.to_string(),
        author_name: author_id.to_uppercase(),
        author_avatar: None,
        votes: VoteTally::default(),
        is_accepted: false,
        images: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
