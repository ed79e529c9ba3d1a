//! # Domain Models
//!
//! These structs represent the core entities of the forum.
//! Threads and replies use UUID v7 for time-ordered identification; user ids are
//! opaque strings handed to us by the identity provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ForumError;
use crate::vote::{VoteTally, VoteValue};

pub type ThreadId = Uuid;
pub type ReplyId = Uuid;
pub type UserId = String;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 50_000;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Closed set of discussion categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    General,
    FeatureRequest,
    BugReport,
    Help,
    /// Only admins may open threads here
    Announcement,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::General,
        Category::FeatureRequest,
        Category::BugReport,
        Category::Help,
        Category::Announcement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::FeatureRequest => "feature-request",
            Category::BugReport => "bug-report",
            Category::Help => "help",
            Category::Announcement => "announcement",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::General => "General Discussion",
            Category::FeatureRequest => "Feature Requests",
            Category::BugReport => "Bug Reports",
            Category::Help => "Help & Support",
            Category::Announcement => "Announcements",
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(self, Category::Announcement)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ForumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ForumError::Validation(format!("unknown category '{s}'")))
    }
}

/// Thread list ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Pinned first, then most recent activity
    #[default]
    Recent,
    /// Highest vote_count first
    Top,
    /// Accepted but never ordered; the store's natural order is returned
    Trending,
}

impl FromStr for SortBy {
    type Err = ForumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(SortBy::Recent),
            "top" => Ok(SortBy::Top),
            "trending" => Ok(SortBy::Trending),
            other => Err(ForumError::Validation(format!("unknown sort '{other}'"))),
        }
    }
}

/// Reply list ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySort {
    #[default]
    Oldest,
    Newest,
    Top,
}

impl FromStr for ReplySort {
    type Err = ForumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oldest" => Ok(ReplySort::Oldest),
            "newest" => Ok(ReplySort::Newest),
            "top" => Ok(ReplySort::Top),
            other => Err(ForumError::Validation(format!("unknown reply sort '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

/// Signed-in identity as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown on threads and replies.
    pub fn author_name(&self) -> String {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(ANONYMOUS_AUTHOR)
            .to_string()
    }
}

/// A top-level forum post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub category: Category,
    pub tags: BTreeSet<String>,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub view_count: i64,
    pub reply_count: i64,
    #[serde(flatten)]
    pub votes: VoteTally,
    /// Public URLs handed back by the BlobStore, in upload order
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on creation and on every new reply; drives `SortBy::Recent`
    pub last_activity_at: DateTime<Utc>,
}

impl Thread {
    pub fn matches_search(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.content.to_lowercase().contains(needle_lower)
    }
}

/// A response nested under a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub thread_id: ThreadId,
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,
    #[serde(flatten)]
    pub votes: VoteTally,
    pub is_accepted: bool,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's current vote on one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: UserId,
    pub value: VoteValue,
    pub created_at: DateTime<Utc>,
}

/// The thing a vote is cast on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteSubject {
    Thread(ThreadId),
    Reply { thread_id: ThreadId, reply_id: ReplyId },
}

impl fmt::Display for VoteSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteSubject::Thread(id) => write!(f, "threads/{id}"),
            VoteSubject::Reply { thread_id, reply_id } => {
                write!(f, "threads/{thread_id}/replies/{reply_id}")
            }
        }
    }
}

/// Raw image bytes as received from the composer.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub data: Bytes,
    pub content_type: Mime,
}

/// Composer input for a new thread.
#[derive(Debug, Clone)]
pub struct ThreadDraft {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub tags: BTreeSet<String>,
    pub images: Vec<ImageUpload>,
}

impl ThreadDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category,
            tags: BTreeSet::new(),
            images: Vec::new(),
        }
    }
}

/// Composer input for a new reply.
#[derive(Debug, Clone)]
pub struct ReplyDraft {
    pub content: String,
    pub images: Vec<ImageUpload>,
}

impl ReplyDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// Thread document as handed to the store. The store assigns id, timestamps
/// and zeroed counters.
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub category: Category,
    pub tags: BTreeSet<String>,
    pub images: Vec<String>,
}

/// Reply document as handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReply {
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub images: Vec<String>,
}

/// Fields an author may change on a thread. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<BTreeSet<String>>,
}

impl ThreadPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.category.is_none() && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyPatch {
    pub content: Option<String>,
}

/// Moderation flags toggled by admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFlag {
    Pinned,
    Locked,
}

/// Filter and ordering for a thread listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadQuery {
    /// `None` means every category
    pub category: Option<Category>,
    pub sort_by: SortBy,
    pub limit: usize,
    /// Case-insensitive substring over title and content. Applied after the
    /// page is fetched, so a page may come back shorter than `limit` even when
    /// more matches exist further down.
    pub search: Option<String>,
}

impl Default for ThreadQuery {
    fn default() -> Self {
        Self {
            category: None,
            sort_by: SortBy::Recent,
            limit: DEFAULT_PAGE_SIZE,
            search: None,
        }
    }
}

/// What a cascade delete removed, so blob cleanup can follow.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedThread {
    pub thread: Thread,
    pub reply_images: Vec<String>,
}

impl DeletedThread {
    pub fn all_images(&self) -> impl Iterator<Item = &String> {
        self.thread.images.iter().chain(self.reply_images.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumStats {
    pub total_threads: u64,
    pub total_replies: i64,
    pub total_views: i64,
    pub category_stats: BTreeMap<Category, u64>,
}

impl ForumStats {
    /// Stats with every category present at zero.
    pub fn empty() -> Self {
        Self {
            category_stats: Category::ALL.into_iter().map(|c| (c, 0)).collect(),
            ..Self::default()
        }
    }
}
