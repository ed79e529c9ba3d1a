//! # ForumSession
//!
//! Client-side application state: the signed-in user, the current filter
//! selection and the last fetched thread list. Every change is published as a
//! [`ForumSnapshot`] on a watch channel so a view can re-render, including the
//! optimistic changes made before a store round trip completes.

use bf_core::{
    Category, ForumStats, Reply, ReplyDraft, ReplyId, Result, SortBy, Thread, ThreadDraft, ThreadId,
    ThreadPatch, ThreadQuery, User, VoteValue,
};
use tokio::sync::watch;
use tracing::error;

use crate::forum::ForumService;
use crate::policy;

/// Everything a view needs to render the forum list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForumSnapshot {
    pub threads: Vec<Thread>,
    pub loading: bool,
    pub error: Option<String>,
    pub stats: Option<ForumStats>,
    /// `None` shows every category
    pub selected_category: Option<Category>,
    pub sort_by: SortBy,
    pub search_query: String,
}

pub struct ForumSession {
    service: ForumService,
    user: Option<User>,
    state: ForumSnapshot,
    updates: watch::Sender<ForumSnapshot>,
}

impl ForumSession {
    pub fn new(service: ForumService, user: Option<User>) -> Self {
        let state = ForumSnapshot::default();
        let (updates, _) = watch::channel(state.clone());
        Self {
            service,
            user,
            state,
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ForumSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> &ForumSnapshot {
        &self.state
    }

    pub fn threads(&self) -> &[Thread] {
        &self.state.threads
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_admin)
    }

    fn publish(&self) {
        self.updates.send_replace(self.state.clone());
    }

    fn current_user(&self) -> Result<User> {
        policy::require_user(self.user.as_ref()).cloned()
    }

    fn patch_thread(&mut self, id: ThreadId, change: impl FnOnce(&mut Thread)) {
        if let Some(thread) = self.state.threads.iter_mut().find(|t| t.id == id) {
            change(thread);
        }
    }

    /// Cached copy when loaded, otherwise a fresh read that does not count a view.
    async fn lookup_thread(&self, id: ThreadId) -> Result<Thread> {
        match self.state.threads.iter().find(|t| t.id == id) {
            Some(thread) => Ok(thread.clone()),
            None => self.service.find_thread(id).await,
        }
    }

    // ==================== FILTERS ====================

    pub fn current_query(&self) -> ThreadQuery {
        ThreadQuery {
            category: self.state.selected_category,
            sort_by: self.state.sort_by,
            limit: self.service.options().default_page_size,
            search: Some(self.state.search_query.clone()).filter(|q| !q.trim().is_empty()),
        }
    }

    pub async fn set_category(&mut self, category: Option<Category>) {
        self.state.selected_category = category;
        self.load_threads().await;
    }

    pub async fn set_sort_by(&mut self, sort_by: SortBy) {
        self.state.sort_by = sort_by;
        self.load_threads().await;
    }

    pub async fn set_search_query(&mut self, search: impl Into<String>) {
        self.state.search_query = search.into();
        self.load_threads().await;
    }

    // ==================== LOADING ====================

    /// Re-fetches with the current selection. Failures land in the snapshot's
    /// `error` and leave the previous list in place.
    pub async fn load_threads(&mut self) {
        let query = self.current_query();
        self.load_threads_with(query).await;
    }

    pub async fn load_threads_with(&mut self, query: ThreadQuery) {
        self.state.loading = true;
        self.state.error = None;
        self.publish();

        match self.service.get_threads(&query).await {
            Ok(threads) => self.state.threads = threads,
            Err(err) => {
                error!(error = %err, "error loading threads");
                self.state.error = Some(err.to_string());
            }
        }

        self.state.loading = false;
        self.publish();
    }

    pub async fn load_stats(&mut self) {
        match self.service.get_forum_stats().await {
            Ok(stats) => {
                self.state.stats = Some(stats);
                self.publish();
            }
            Err(err) => error!(error = %err, "error loading stats"),
        }
    }

    // ==================== THREADS ====================

    pub async fn create_thread(&mut self, draft: ThreadDraft) -> Result<Thread> {
        let user = self.current_user()?;
        policy::validate_thread_draft(&draft)?;
        policy::ensure_can_post_in(&user, draft.category)?;

        let thread = self
            .service
            .create_thread(draft, &user)
            .await
            .inspect_err(|err| error!(user_id = %user.id, error = %err, "error creating thread"))?;
        self.state.threads.insert(0, thread.clone());
        self.publish();
        self.load_stats().await;
        Ok(thread)
    }

    pub async fn update_thread(&mut self, id: ThreadId, patch: ThreadPatch) -> Result<()> {
        let user = self.current_user()?;
        policy::validate_thread_patch(&patch)?;
        if let Some(category) = patch.category {
            policy::ensure_can_post_in(&user, category)?;
        }
        let existing = self.lookup_thread(id).await?;
        policy::ensure_author_or_admin(&user, &existing.author_id, "edit this thread")?;

        self.service
            .update_thread(id, patch.clone())
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error updating thread"))?;
        self.patch_thread(id, |thread| {
            if let Some(title) = patch.title {
                thread.title = title.trim().to_string();
            }
            if let Some(content) = patch.content {
                thread.content = content.trim().to_string();
            }
            if let Some(category) = patch.category {
                thread.category = category;
            }
            if let Some(tags) = patch.tags {
                thread.tags = tags;
            }
        });
        self.publish();
        Ok(())
    }

    pub async fn delete_thread(&mut self, id: ThreadId) -> Result<()> {
        let user = self.current_user()?;
        let existing = self.lookup_thread(id).await?;
        policy::ensure_author_or_admin(&user, &existing.author_id, "delete this thread")?;

        self.service
            .delete_thread(id)
            .await
            .inspect_err(|err| error!(thread_id = %id, error = %err, "error deleting thread"))?;
        self.state.threads.retain(|t| t.id != id);
        self.publish();
        self.load_stats().await;
        Ok(())
    }

    /// Flips the local flag first, reverts it if the store rejects the
    /// change, and re-fetches on success so pinned threads move to the top.
    pub async fn toggle_pin_thread(&mut self, id: ThreadId, pinned: bool) -> Result<()> {
        policy::ensure_admin(&self.current_user()?, "pin threads")?;

        let previous = self.state.threads.clone();
        self.patch_thread(id, |t| t.is_pinned = pinned);
        self.publish();

        if let Err(err) = self.service.toggle_pin_thread(id, pinned).await {
            error!(thread_id = %id, error = %err, "error toggling pin");
            self.revert(previous);
            return Err(err);
        }
        self.load_threads().await;
        Ok(())
    }

    pub async fn toggle_lock_thread(&mut self, id: ThreadId, locked: bool) -> Result<()> {
        policy::ensure_admin(&self.current_user()?, "lock threads")?;

        let previous = self.state.threads.clone();
        self.patch_thread(id, |t| t.is_locked = locked);
        self.publish();

        if let Err(err) = self.service.toggle_lock_thread(id, locked).await {
            error!(thread_id = %id, error = %err, "error toggling lock");
            self.revert(previous);
            return Err(err);
        }
        Ok(())
    }

    fn revert(&mut self, threads: Vec<Thread>) {
        self.state.threads = threads;
        self.publish();
    }

    // ==================== REPLIES ====================

    pub async fn create_reply(&mut self, thread_id: ThreadId, draft: ReplyDraft) -> Result<Reply> {
        let user = self.current_user()?;
        policy::validate_content(&draft.content)?;
        let thread = self.lookup_thread(thread_id).await?;
        policy::ensure_can_reply(&user, &thread)?;

        let previous = self.state.threads.clone();
        self.patch_thread(thread_id, |t| t.reply_count += 1);
        self.publish();

        match self.service.create_reply(thread_id, draft, &user).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                error!(thread_id = %thread_id, error = %err, "error creating reply");
                self.revert(previous);
                Err(err)
            }
        }
    }

    pub async fn delete_reply(&mut self, thread_id: ThreadId, reply_id: ReplyId) -> Result<()> {
        let user = self.current_user()?;
        let reply = self.service.find_reply(thread_id, reply_id).await?;
        policy::ensure_author_or_admin(&user, &reply.author_id, "delete this reply")?;

        let previous = self.state.threads.clone();
        self.patch_thread(thread_id, |t| t.reply_count = (t.reply_count - 1).max(0));
        self.publish();

        if let Err(err) = self.service.delete_reply(thread_id, reply_id).await {
            error!(thread_id = %thread_id, reply_id = %reply_id, error = %err, "error deleting reply");
            self.revert(previous);
            return Err(err);
        }
        Ok(())
    }

    // ==================== VOTING ====================

    /// Votes, then re-fetches the whole list to pick up the new counts.
    pub async fn vote_on_thread(&mut self, thread_id: ThreadId, value: VoteValue) -> Result<Option<VoteValue>> {
        let user = self.current_user()?;
        let outcome = self
            .service
            .vote_on_thread(thread_id, &user.id, value)
            .await
            .inspect_err(|err| error!(thread_id = %thread_id, error = %err, "error voting on thread"))?;
        self.load_threads().await;
        Ok(outcome)
    }

    pub async fn vote_on_reply(
        &mut self,
        thread_id: ThreadId,
        reply_id: ReplyId,
        value: VoteValue,
    ) -> Result<Option<VoteValue>> {
        let user = self.current_user()?;
        self.service
            .vote_on_reply(thread_id, reply_id, &user.id, value)
            .await
            .inspect_err(|err| error!(reply_id = %reply_id, error = %err, "error voting on reply"))
    }
}

impl std::fmt::Debug for ForumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumSession")
            .field("user", &self.user)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
