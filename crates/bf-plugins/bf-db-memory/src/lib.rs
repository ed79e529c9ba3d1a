//! # bf-db-memory
//!
//! In-process implementation of `ForumRepo`.
//! Documents nest the way the hosted store nests them: a thread owns its reply
//! and vote sub-collections, a reply owns its own votes. Dropping a thread
//! document therefore drops everything beneath it.
//!
//! A single `RwLock` serializes writers, which gives every trait method the
//! all-or-nothing behavior the port asks for.

use std::collections::HashMap;

use async_trait::async_trait;
use bf_core::{
    Category, DeletedThread, ForumError, ForumRepo, ForumStats, NewReply, NewThread, RecordChange, Reply, ReplyId,
    ReplyPatch, ReplySort, Result, SortBy, Thread, ThreadFlag, ThreadId, ThreadPatch, UserId, Vote, VoteSubject,
    VoteTally, VoteTransition,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

struct ReplyDoc {
    reply: Reply,
    votes: HashMap<UserId, Vote>,
}

struct ThreadDoc {
    thread: Thread,
    replies: HashMap<ReplyId, ReplyDoc>,
    votes: HashMap<UserId, Vote>,
}

#[derive(Default)]
struct Documents {
    threads: HashMap<ThreadId, ThreadDoc>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Documents {
    /// Store-side clock, strictly increasing so ordering by time never ties.
    fn server_time(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now
    }

    fn thread_mut(&mut self, id: ThreadId) -> Result<&mut ThreadDoc> {
        self.threads.get_mut(&id).ok_or_else(|| ForumError::thread_not_found(id))
    }

    fn reply_mut(&mut self, thread_id: ThreadId, reply_id: ReplyId) -> Result<&mut ReplyDoc> {
        self.thread_mut(thread_id)?
            .replies
            .get_mut(&reply_id)
            .ok_or_else(|| ForumError::reply_not_found(reply_id))
    }

    fn subject_mut(&mut self, subject: VoteSubject) -> Result<(&mut VoteTally, &mut HashMap<UserId, Vote>)> {
        match subject {
            VoteSubject::Thread(id) => {
                let doc = self.thread_mut(id)?;
                Ok((&mut doc.thread.votes, &mut doc.votes))
            }
            VoteSubject::Reply { thread_id, reply_id } => {
                let doc = self.reply_mut(thread_id, reply_id)?;
                Ok((&mut doc.reply.votes, &mut doc.votes))
            }
        }
    }

    fn subject(&self, subject: VoteSubject) -> Option<&HashMap<UserId, Vote>> {
        match subject {
            VoteSubject::Thread(id) => self.threads.get(&id).map(|doc| &doc.votes),
            VoteSubject::Reply { thread_id, reply_id } => self
                .threads
                .get(&thread_id)
                .and_then(|doc| doc.replies.get(&reply_id))
                .map(|doc| &doc.votes),
        }
    }
}

#[derive(Default)]
pub struct MemoryForumRepo {
    docs: RwLock<Documents>,
}

impl MemoryForumRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vote records stored anywhere under the thread, reply-level
    /// votes included.
    pub async fn vote_records_under(&self, thread_id: ThreadId) -> usize {
        let docs = self.docs.read().await;
        docs.threads.get(&thread_id).map_or(0, |doc| {
            doc.votes.len() + doc.replies.values().map(|r| r.votes.len()).sum::<usize>()
        })
    }
}

#[async_trait]
impl ForumRepo for MemoryForumRepo {
    async fn insert_thread(&self, new: NewThread) -> Result<Thread> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let thread = Thread {
            id: Uuid::now_v7(),
            title: new.title,
            content: new.content,
            author_id: new.author_id,
            author_name: new.author_name,
            author_avatar: new.author_avatar,
            category: new.category,
            tags: new.tags,
            is_pinned: false,
            is_locked: false,
            view_count: 0,
            reply_count: 0,
            votes: VoteTally::default(),
            images: new.images,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };

        docs.threads.insert(
            thread.id,
            ThreadDoc {
                thread: thread.clone(),
                replies: HashMap::new(),
                votes: HashMap::new(),
            },
        );
        Ok(thread)
    }

    async fn find_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        let docs = self.docs.read().await;
        Ok(docs.threads.get(&id).map(|doc| doc.thread.clone()))
    }

    async fn list_threads(&self, category: Option<Category>, sort_by: SortBy, limit: usize) -> Result<Vec<Thread>> {
        let docs = self.docs.read().await;
        let mut threads: Vec<Thread> = docs
            .threads
            .values()
            .map(|doc| &doc.thread)
            .filter(|t| category.map_or(true, |c| t.category == c))
            .cloned()
            .collect();

        match sort_by {
            SortBy::Recent => threads.sort_by(|a, b| {
                b.is_pinned
                    .cmp(&a.is_pinned)
                    .then(b.last_activity_at.cmp(&a.last_activity_at))
            }),
            SortBy::Top => threads.sort_by(|a, b| b.votes.vote_count.cmp(&a.votes.vote_count).then(a.id.cmp(&b.id))),
            // Natural document order
            SortBy::Trending => threads.sort_by_key(|t| t.id),
        }

        threads.truncate(limit);
        Ok(threads)
    }

    async fn increment_view_count(&self, id: ThreadId) -> Result<()> {
        let mut docs = self.docs.write().await;
        docs.thread_mut(id)?.thread.view_count += 1;
        Ok(())
    }

    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<()> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let thread = &mut docs.thread_mut(id)?.thread;
        if let Some(title) = patch.title {
            thread.title = title;
        }
        if let Some(content) = patch.content {
            thread.content = content;
        }
        if let Some(category) = patch.category {
            thread.category = category;
        }
        if let Some(tags) = patch.tags {
            thread.tags = tags;
        }
        thread.updated_at = now;
        Ok(())
    }

    async fn set_thread_flag(&self, id: ThreadId, flag: ThreadFlag, value: bool) -> Result<()> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let thread = &mut docs.thread_mut(id)?.thread;
        match flag {
            ThreadFlag::Pinned => thread.is_pinned = value,
            ThreadFlag::Locked => thread.is_locked = value,
        }
        thread.updated_at = now;
        Ok(())
    }

    async fn delete_thread_cascade(&self, id: ThreadId) -> Result<DeletedThread> {
        let mut docs = self.docs.write().await;
        let doc = docs.threads.remove(&id).ok_or_else(|| ForumError::thread_not_found(id))?;
        debug!(thread_id = %id, replies = doc.replies.len(), votes = doc.votes.len(), "thread documents removed");

        let reply_images = doc
            .replies
            .into_values()
            .flat_map(|r| r.reply.images)
            .collect();
        Ok(DeletedThread {
            thread: doc.thread,
            reply_images,
        })
    }

    async fn insert_reply(&self, thread_id: ThreadId, new: NewReply) -> Result<Reply> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let doc = docs.thread_mut(thread_id)?;

        let reply = Reply {
            id: Uuid::now_v7(),
            thread_id,
            content: new.content,
            author_id: new.author_id,
            author_name: new.author_name,
            author_avatar: new.author_avatar,
            votes: VoteTally::default(),
            is_accepted: false,
            images: new.images,
            created_at: now,
            updated_at: now,
        };

        doc.replies.insert(
            reply.id,
            ReplyDoc {
                reply: reply.clone(),
                votes: HashMap::new(),
            },
        );
        doc.thread.reply_count += 1;
        doc.thread.last_activity_at = now;
        Ok(reply)
    }

    async fn find_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Option<Reply>> {
        let docs = self.docs.read().await;
        Ok(docs
            .threads
            .get(&thread_id)
            .and_then(|doc| doc.replies.get(&reply_id))
            .map(|doc| doc.reply.clone()))
    }

    async fn list_replies(&self, thread_id: ThreadId, sort: ReplySort) -> Result<Vec<Reply>> {
        let docs = self.docs.read().await;
        let Some(doc) = docs.threads.get(&thread_id) else {
            return Ok(Vec::new());
        };

        let mut replies: Vec<Reply> = doc.replies.values().map(|r| r.reply.clone()).collect();
        match sort {
            ReplySort::Oldest => replies.sort_by_key(|r| r.created_at),
            ReplySort::Newest => replies.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ReplySort::Top => {
                replies.sort_by(|a, b| b.votes.vote_count.cmp(&a.votes.vote_count).then(a.created_at.cmp(&b.created_at)))
            }
        }
        Ok(replies)
    }

    async fn update_reply(&self, thread_id: ThreadId, reply_id: ReplyId, patch: ReplyPatch) -> Result<()> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let reply = &mut docs.reply_mut(thread_id, reply_id)?.reply;
        if let Some(content) = patch.content {
            reply.content = content;
        }
        reply.updated_at = now;
        Ok(())
    }

    async fn set_reply_accepted(&self, thread_id: ThreadId, reply_id: ReplyId, accepted: bool) -> Result<()> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let reply = &mut docs.reply_mut(thread_id, reply_id)?.reply;
        reply.is_accepted = accepted;
        reply.updated_at = now;
        Ok(())
    }

    async fn delete_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Reply> {
        let mut docs = self.docs.write().await;
        let doc = docs.thread_mut(thread_id)?;
        let removed = doc
            .replies
            .remove(&reply_id)
            .ok_or_else(|| ForumError::reply_not_found(reply_id))?;
        doc.thread.reply_count = (doc.thread.reply_count - 1).max(0);
        Ok(removed.reply)
    }

    async fn find_vote(&self, subject: VoteSubject, user_id: &str) -> Result<Option<Vote>> {
        let docs = self.docs.read().await;
        Ok(docs.subject(subject).and_then(|votes| votes.get(user_id)).cloned())
    }

    async fn commit_vote(&self, subject: VoteSubject, user_id: &str, transition: VoteTransition) -> Result<()> {
        let mut docs = self.docs.write().await;
        let now = docs.server_time();
        let (tally, votes) = docs.subject_mut(subject)?;

        let current = votes.get(user_id).map(|v| v.value);
        if current != transition.previous {
            return Err(ForumError::Conflict(format!(
                "vote by {user_id} on {subject} changed since it was read"
            )));
        }

        match transition.record {
            RecordChange::Create(value) => {
                votes.insert(
                    user_id.to_string(),
                    Vote {
                        user_id: user_id.to_string(),
                        value,
                        created_at: now,
                    },
                );
            }
            RecordChange::Flip(value) => {
                if let Some(vote) = votes.get_mut(user_id) {
                    vote.value = value;
                }
            }
            RecordChange::Remove => {
                votes.remove(user_id);
            }
        }
        tally.apply(transition.delta);
        Ok(())
    }

    async fn forum_stats(&self) -> Result<ForumStats> {
        let docs = self.docs.read().await;
        let mut stats = ForumStats::empty();
        for doc in docs.threads.values() {
            let thread = &doc.thread;
            stats.total_threads += 1;
            stats.total_replies += thread.reply_count;
            stats.total_views += thread.view_count;
            *stats.category_stats.entry(thread.category).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
