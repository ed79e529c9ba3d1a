//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;

use crate::error::Result;
use crate::models::{
    Category, DeletedThread, ForumStats, NewReply, NewThread, Reply, ReplyId, ReplyPatch, ReplySort, SortBy, Thread,
    ThreadFlag, ThreadId, ThreadPatch, Vote, VoteSubject,
};
use crate::vote::VoteTransition;

/// Document persistence contract for threads, replies and votes.
///
/// Stores assign ids and every timestamp from their own clock; callers never
/// supply times. Operations on an absent thread or reply fail with
/// `ForumError::NotFound`.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ForumRepo: Send + Sync {
    // Thread Operations
    async fn insert_thread(&self, thread: NewThread) -> Result<Thread>;
    async fn find_thread(&self, id: ThreadId) -> Result<Option<Thread>>;
    async fn list_threads(&self, category: Option<Category>, sort_by: SortBy, limit: usize) -> Result<Vec<Thread>>;
    async fn increment_view_count(&self, id: ThreadId) -> Result<()>;
    /// Merges the patch and stamps `updated_at`.
    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<()>;
    async fn set_thread_flag(&self, id: ThreadId, flag: ThreadFlag, value: bool) -> Result<()>;
    /// Removes the thread, its replies, its votes and every reply-level vote
    /// in one all-or-nothing unit.
    async fn delete_thread_cascade(&self, id: ThreadId) -> Result<DeletedThread>;

    // Reply Operations
    /// Inserts the reply, increments the parent's `reply_count` and bumps its
    /// `last_activity_at`.
    async fn insert_reply(&self, thread_id: ThreadId, reply: NewReply) -> Result<Reply>;
    async fn find_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Option<Reply>>;
    async fn list_replies(&self, thread_id: ThreadId, sort: ReplySort) -> Result<Vec<Reply>>;
    async fn update_reply(&self, thread_id: ThreadId, reply_id: ReplyId, patch: ReplyPatch) -> Result<()>;
    async fn set_reply_accepted(&self, thread_id: ThreadId, reply_id: ReplyId, accepted: bool) -> Result<()>;
    /// Removes the reply with its votes and decrements the parent's
    /// `reply_count`, returning what was removed.
    async fn delete_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Reply>;

    // Vote Operations
    async fn find_vote(&self, subject: VoteSubject, user_id: &str) -> Result<Option<Vote>>;
    /// Applies the record change and counter delta as one conditional write.
    /// Fails with `ForumError::Conflict` when the stored record no longer
    /// matches `transition.previous`.
    async fn commit_vote(&self, subject: VoteSubject, user_id: &str, transition: VoteTransition) -> Result<()>;

    async fn forum_stats(&self) -> Result<ForumStats>;
}

/// Object storage contract for attached images.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes the bytes at `path` and returns the public URL.
    async fn upload(&self, path: &str, data: Bytes, content_type: &Mime) -> Result<String>;
    /// Resolves a URL previously returned by `upload` back to its path and
    /// removes the object.
    async fn delete_by_url(&self, url: &str) -> Result<()>;
}
