//! # ForumService
//!
//! The forum data access layer. Translates application intents into store and
//! blob operations while keeping two invariants: a subject's counters always
//! reflect its vote records, and deleting a parent removes everything it owns.
//!
//! Failures are logged here and handed back unchanged; deciding what the user
//! sees is the caller's job.

use std::sync::Arc;

use bf_core::{
    reconcile, BlobStore, ForumError, ForumRepo, ForumStats, NewReply, NewThread, Reply, ReplyDraft, ReplyId,
    ReplyPatch, ReplySort, Result, Thread, ThreadDraft, ThreadFlag, ThreadId, ThreadPatch, ThreadQuery, User,
    VoteSubject, VoteValue, DEFAULT_PAGE_SIZE,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::images::{self, reply_image_path, thread_image_path};

/// Tunables for the data access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Page size used when a query asks for `limit == 0`
    pub default_page_size: usize,
    /// How many times a vote is re-read and re-committed after a conflict
    pub vote_retry_limit: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            vote_retry_limit: 3,
        }
    }
}

#[derive(Clone)]
pub struct ForumService {
    repo: Arc<dyn ForumRepo>,
    blobs: Arc<dyn BlobStore>,
    options: ServiceOptions,
}

impl ForumService {
    pub fn new(repo: Arc<dyn ForumRepo>, blobs: Arc<dyn BlobStore>) -> Self {
        Self::with_options(repo, blobs, ServiceOptions::default())
    }

    pub fn with_options(repo: Arc<dyn ForumRepo>, blobs: Arc<dyn BlobStore>, options: ServiceOptions) -> Self {
        Self { repo, blobs, options }
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    // ==================== THREADS ====================

    /// Persists a new thread with zeroed counters.
    ///
    /// Title and content are trimmed but not re-validated. Images are uploaded
    /// before the document is written; an upload failure fails the call.
    pub async fn create_thread(&self, draft: ThreadDraft, user: &User) -> Result<Thread> {
        let batch = Utc::now().timestamp_millis();
        let image_urls = images::upload_all(self.blobs.as_ref(), draft.images, |index| {
            thread_image_path(&user.id, batch, index)
        })
        .await
        .inspect_err(|err| error!(user_id = %user.id, error = %err, "error uploading thread images"))?;

        let new_thread = NewThread {
            title: draft.title.trim().to_string(),
            content: draft.content.trim().to_string(),
            author_id: user.id.clone(),
            author_name: user.author_name(),
            author_avatar: user.avatar_url.clone(),
            category: draft.category,
            tags: draft.tags,
            images: image_urls,
        };

        let thread = self
            .repo
            .insert_thread(new_thread)
            .await
            .inspect_err(|err| error!(user_id = %user.id, error = %err, "error creating thread"))?;

        info!(thread_id = %thread.id, category = %thread.category, "thread created");
        Ok(thread)
    }

    /// Lists threads for the given filter and ordering.
    ///
    /// Search runs over the fetched page only, so fewer than `limit` threads
    /// may come back even when more matches exist.
    pub async fn get_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>> {
        let limit = if query.limit == 0 {
            self.options.default_page_size
        } else {
            query.limit
        };

        let threads = self
            .repo
            .list_threads(query.category, query.sort_by, limit)
            .await
            .inspect_err(|err| error!(error = %err, "error getting threads"))?;

        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        Ok(match needle {
            Some(needle) => threads.into_iter().filter(|t| t.matches_search(&needle)).collect(),
            None => threads,
        })
    }

    /// Fetches a thread for display and counts the view.
    ///
    /// Every call increments `view_count`, including repeat views by the same
    /// reader. The returned document is the one read before the increment.
    pub async fn get_thread(&self, id: ThreadId) -> Result<Thread> {
        let thread = self.find_thread(id).await?;
        self.repo
            .increment_view_count(id)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error counting thread view"))?;
        Ok(thread)
    }

    /// Fetches a thread without counting a view.
    pub async fn find_thread(&self, id: ThreadId) -> Result<Thread> {
        self.repo
            .find_thread(id)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error getting thread"))?
            .ok_or_else(|| ForumError::thread_not_found(id))
    }

    /// Merges the given fields and stamps `updated_at`. Text fields are trimmed.
    pub async fn update_thread(&self, id: ThreadId, mut patch: ThreadPatch) -> Result<()> {
        patch.title = patch.title.map(|t| t.trim().to_string());
        patch.content = patch.content.map(|c| c.trim().to_string());
        self.repo
            .update_thread(id, patch)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error updating thread"))
    }

    /// Removes the thread with every reply and vote under it, then its images.
    ///
    /// Documents go in one store transaction. Image cleanup runs afterwards
    /// and is best-effort: a failure leaves an orphaned blob, never an
    /// orphaned document.
    pub async fn delete_thread(&self, id: ThreadId) -> Result<()> {
        let deleted = self
            .repo
            .delete_thread_cascade(id)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error deleting thread"))?;

        images::delete_all(self.blobs.as_ref(), deleted.all_images()).await;
        info!(thread_id = %id, "thread deleted");
        Ok(())
    }

    pub async fn toggle_pin_thread(&self, id: ThreadId, pinned: bool) -> Result<()> {
        self.repo
            .set_thread_flag(id, ThreadFlag::Pinned, pinned)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error toggling pin"))
    }

    pub async fn toggle_lock_thread(&self, id: ThreadId, locked: bool) -> Result<()> {
        self.repo
            .set_thread_flag(id, ThreadFlag::Locked, locked)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error toggling lock"))
    }

    // ==================== REPLIES ====================

    /// Adds a reply, bumping the parent's reply count and activity time.
    pub async fn create_reply(&self, thread_id: ThreadId, draft: ReplyDraft, user: &User) -> Result<Reply> {
        // Fail before uploading anything for a thread that is gone.
        self.find_thread(thread_id).await?;

        let batch = Utc::now().timestamp_millis();
        let image_urls = images::upload_all(self.blobs.as_ref(), draft.images, |index| {
            reply_image_path(thread_id, &user.id, batch, index)
        })
        .await
        .inspect_err(|err| error!(thread_id = %thread_id, error = %err, "error uploading reply images"))?;

        let new_reply = NewReply {
            content: draft.content.trim().to_string(),
            author_id: user.id.clone(),
            author_name: user.author_name(),
            author_avatar: user.avatar_url.clone(),
            images: image_urls,
        };

        let reply = self
            .repo
            .insert_reply(thread_id, new_reply)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, error = %err, "error creating reply"))?;

        debug!(thread_id = %thread_id, reply_id = %reply.id, "reply created");
        Ok(reply)
    }

    pub async fn get_replies(&self, thread_id: ThreadId, sort: ReplySort) -> Result<Vec<Reply>> {
        self.repo
            .list_replies(thread_id, sort)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, error = %err, "error getting replies"))
    }

    pub async fn find_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Reply> {
        self.repo
            .find_reply(thread_id, reply_id)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, reply_id = %reply_id, error = %err, "error getting reply"))?
            .ok_or_else(|| ForumError::reply_not_found(reply_id))
    }

    pub async fn update_reply(&self, thread_id: ThreadId, reply_id: ReplyId, mut patch: ReplyPatch) -> Result<()> {
        patch.content = patch.content.map(|c| c.trim().to_string());
        self.repo
            .update_reply(thread_id, reply_id, patch)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, reply_id = %reply_id, error = %err, "error updating reply"))
    }

    pub async fn delete_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<()> {
        let reply = self
            .repo
            .delete_reply(thread_id, reply_id)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, reply_id = %reply_id, error = %err, "error deleting reply"))?;

        images::delete_all(self.blobs.as_ref(), &reply.images).await;
        Ok(())
    }

    pub async fn mark_reply_as_accepted(&self, thread_id: ThreadId, reply_id: ReplyId, accepted: bool) -> Result<()> {
        self.repo
            .set_reply_accepted(thread_id, reply_id, accepted)
            .await
            .inspect_err(|err| {
                error!(thread_id = %thread_id, reply_id = %reply_id, error = %err, "error marking reply as accepted")
            })
    }

    // ==================== VOTING ====================

    /// Casts, flips or withdraws `user_id`'s vote on a thread. Returns the
    /// voter's effective vote afterwards (`None` after a withdrawal).
    pub async fn vote_on_thread(&self, thread_id: ThreadId, user_id: &str, value: VoteValue) -> Result<Option<VoteValue>> {
        self.vote(VoteSubject::Thread(thread_id), user_id, value).await
    }

    pub async fn vote_on_reply(
        &self,
        thread_id: ThreadId,
        reply_id: ReplyId,
        user_id: &str,
        value: VoteValue,
    ) -> Result<Option<VoteValue>> {
        self.vote(VoteSubject::Reply { thread_id, reply_id }, user_id, value).await
    }

    /// Read the record, reconcile, commit conditionally. A conflicting
    /// concurrent vote sends us back to the read, up to the retry limit.
    async fn vote(&self, subject: VoteSubject, user_id: &str, value: VoteValue) -> Result<Option<VoteValue>> {
        let mut retries = 0;
        loop {
            let existing = self
                .repo
                .find_vote(subject, user_id)
                .await
                .inspect_err(|err| error!(%subject, user_id, error = %err, "error reading vote"))?
                .map(|vote| vote.value);

            let transition = reconcile(existing, value);
            match self.repo.commit_vote(subject, user_id, transition).await {
                Ok(()) => {
                    debug!(%subject, user_id, outcome = ?transition.outcome(), "vote committed");
                    return Ok(transition.outcome());
                }
                Err(err) if err.is_conflict() && retries < self.options.vote_retry_limit => {
                    retries += 1;
                    warn!(%subject, user_id, retries, "vote conflicted, retrying");
                }
                Err(err) => {
                    error!(%subject, user_id, error = %err, "error voting");
                    return Err(err);
                }
            }
        }
    }

    /// The user's current vote on a thread; `None` when absent or unreadable.
    pub async fn get_user_thread_vote(&self, thread_id: ThreadId, user_id: &str) -> Option<VoteValue> {
        self.user_vote(VoteSubject::Thread(thread_id), user_id).await
    }

    pub async fn get_user_reply_vote(&self, thread_id: ThreadId, reply_id: ReplyId, user_id: &str) -> Option<VoteValue> {
        self.user_vote(VoteSubject::Reply { thread_id, reply_id }, user_id).await
    }

    async fn user_vote(&self, subject: VoteSubject, user_id: &str) -> Option<VoteValue> {
        match self.repo.find_vote(subject, user_id).await {
            Ok(vote) => vote.map(|v| v.value),
            Err(err) => {
                warn!(%subject, user_id, error = %err, "error getting user vote");
                None
            }
        }
    }

    // ==================== STATISTICS ====================

    pub async fn get_forum_stats(&self) -> Result<ForumStats> {
        self.repo
            .forum_stats()
            .await
            .inspect_err(|err| error!(error = %err, "error getting forum stats"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_core::{
        Category, DeletedThread, ImageUpload, MockBlobStore, MockForumRepo, RecordChange, Role, Vote, VoteTally,
    };
    use bytes::Bytes;
    use mockall::predicate::*;
    use uuid::Uuid;

    fn member() -> User {
        User {
            id: "user-a".to_string(),
            display_name: Some("Ava".to_string()),
            avatar_url: None,
            role: Role::Member,
        }
    }

    fn stored_thread(id: ThreadId, images: Vec<String>) -> Thread {
        let now = Utc::now();
        Thread {
            id,
            title: "Hello".into(),
            content: "World".into(),
            author_id: "user-a".into(),
            author_name: "Ava".into(),
            author_avatar: None,
            category: Category::General,
            tags: Default::default(),
            is_pinned: false,
            is_locked: false,
            view_count: 0,
            reply_count: 0,
            votes: VoteTally::default(),
            images,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    fn service(repo: MockForumRepo, blobs: MockBlobStore) -> ForumService {
        ForumService::new(Arc::new(repo), Arc::new(blobs))
    }

    fn png(bytes: &'static [u8]) -> ImageUpload {
        ImageUpload {
            data: Bytes::from_static(bytes),
            content_type: mime::IMAGE_PNG,
        }
    }

    #[tokio::test]
    async fn create_thread_trims_and_uploads_under_user_path() {
        let mut repo = MockForumRepo::new();
        let mut blobs = MockBlobStore::new();

        blobs
            .expect_upload()
            .times(2)
            .withf(|path, _, content_type| path.starts_with("forum/threads/user-a/") && *content_type == mime::IMAGE_PNG)
            .returning(|path, _, _| Ok(format!("https://cdn.test/{path}")));

        repo.expect_insert_thread()
            .withf(|t| t.title == "Hello" && t.content == "World" && t.author_name == "Ava" && t.images.len() == 2)
            .returning(|t| Ok(stored_thread(Uuid::now_v7(), t.images)));

        let mut draft = ThreadDraft::new("  Hello ", "\nWorld\n", Category::General);
        draft.images = vec![png(b"a"), png(b"b")];

        let thread = service(repo, blobs).create_thread(draft, &member()).await.unwrap();
        assert!(thread.images[0].ends_with("_0"));
        assert!(thread.images[1].ends_with("_1"));
    }

    #[tokio::test]
    async fn failed_upload_fails_creation_without_writing() {
        let mut repo = MockForumRepo::new();
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_upload()
            .returning(|_, _, _| Err(ForumError::Transient("bucket unavailable".into())));
        repo.expect_insert_thread().never();

        let mut draft = ThreadDraft::new("Hello", "World", Category::General);
        draft.images = vec![png(b"a")];

        let err = service(repo, blobs).create_thread(draft, &member()).await.unwrap_err();
        assert!(matches!(err, ForumError::Transient(_)));
    }

    #[tokio::test]
    async fn missing_thread_is_not_found_and_not_counted() {
        let mut repo = MockForumRepo::new();
        repo.expect_find_thread().returning(|_| Ok(None));
        repo.expect_increment_view_count().never();

        let err = service(repo, MockBlobStore::new()).get_thread(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, ForumError::NotFound(..)));
    }

    #[tokio::test]
    async fn vote_retries_after_conflict() {
        let thread_id = Uuid::now_v7();
        let mut repo = MockForumRepo::new();
        let mut reads = 0;
        repo.expect_find_vote().times(2).returning(move |_, user_id| {
            reads += 1;
            // Second read sees the upvote a concurrent request just committed.
            Ok((reads == 2).then(|| Vote {
                user_id: user_id.to_string(),
                value: VoteValue::Up,
                created_at: Utc::now(),
            }))
        });
        let mut commits = 0;
        repo.expect_commit_vote()
            .withf(move |subject, user_id, _| *subject == VoteSubject::Thread(thread_id) && user_id == "user-a")
            .times(2)
            .returning(move |_, _, transition| {
                commits += 1;
                if commits == 1 {
                    assert_eq!(transition.record, RecordChange::Create(VoteValue::Up));
                    Err(ForumError::Conflict("vote changed".into()))
                } else {
                    assert_eq!(transition.record, RecordChange::Remove);
                    Ok(())
                }
            });

        let outcome = service(repo, MockBlobStore::new())
            .vote_on_thread(thread_id, "user-a", VoteValue::Up)
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn vote_surfaces_conflict_after_retry_limit() {
        let mut repo = MockForumRepo::new();
        repo.expect_find_vote().returning(|_, _| Ok(None));
        repo.expect_commit_vote()
            .times(3)
            .returning(|_, _, _| Err(ForumError::Conflict("busy".into())));

        let options = ServiceOptions {
            vote_retry_limit: 2,
            ..ServiceOptions::default()
        };
        let svc = ForumService::with_options(Arc::new(repo), Arc::new(MockBlobStore::new()), options);
        let err = svc.vote_on_thread(Uuid::now_v7(), "user-a", VoteValue::Down).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn image_cleanup_failures_do_not_fail_delete() {
        let id = Uuid::now_v7();
        let mut repo = MockForumRepo::new();
        repo.expect_delete_thread_cascade().with(eq(id)).returning(|id| {
            Ok(DeletedThread {
                thread: stored_thread(id, vec!["https://cdn.test/forum/threads/u/1_0".into()]),
                reply_images: vec!["https://cdn.test/forum/replies/t/u/2_0".into()],
            })
        });
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_delete_by_url()
            .times(2)
            .returning(|_| Err(ForumError::Transient("gone".into())));

        service(repo, blobs).delete_thread(id).await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_user_vote_reads_as_none() {
        let mut repo = MockForumRepo::new();
        repo.expect_find_vote()
            .returning(|_, _| Err(ForumError::Transient("timeout".into())));

        let vote = service(repo, MockBlobStore::new())
            .get_user_thread_vote(Uuid::now_v7(), "user-a")
            .await;
        assert_eq!(vote, None);
    }

    #[tokio::test]
    async fn search_filters_the_fetched_page() {
        let mut repo = MockForumRepo::new();
        repo.expect_list_threads()
            .with(eq(None), eq(bf_core::SortBy::Recent), eq(DEFAULT_PAGE_SIZE))
            .returning(|_, _, _| {
                let mut a = stored_thread(Uuid::now_v7(), vec![]);
                a.title = "Check-in reminders".into();
                let b = stored_thread(Uuid::now_v7(), vec![]);
                Ok(vec![a, b])
            });

        let query = ThreadQuery {
            limit: 0,
            search: Some("CHECK-IN".into()),
            ..ThreadQuery::default()
        };
        let threads = service(repo, MockBlobStore::new()).get_threads(&query).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "Check-in reminders");
    }
}
