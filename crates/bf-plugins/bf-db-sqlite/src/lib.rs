//! # bf-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `bf-core` domain models.
//!
//! The hosted store's sub-collections become four tables keyed the same way:
//! `threads`, `replies` (by `thread_id`), `thread_votes` (by thread and user)
//! and `reply_votes` (by reply and user). Timestamps are stored as
//! microseconds since the epoch so ordering by them is plain integer ordering.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bf_core::{
    Category, DeletedThread, ForumError, ForumRepo, ForumStats, NewReply, NewThread, RecordChange, Reply, ReplyId,
    ReplyPatch, ReplySort, Result, SortBy, Thread, ThreadFlag, ThreadId, ThreadPatch, Vote, VoteSubject, VoteTally,
    VoteTransition, VoteValue,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS threads (
        id BLOB PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        author_id TEXT NOT NULL,
        author_name TEXT NOT NULL,
        author_avatar TEXT,
        category TEXT NOT NULL,
        tags TEXT NOT NULL,
        is_pinned INTEGER NOT NULL DEFAULT 0,
        is_locked INTEGER NOT NULL DEFAULT 0,
        view_count INTEGER NOT NULL DEFAULT 0,
        reply_count INTEGER NOT NULL DEFAULT 0,
        vote_count INTEGER NOT NULL DEFAULT 0,
        upvotes INTEGER NOT NULL DEFAULT 0,
        downvotes INTEGER NOT NULL DEFAULT 0,
        images TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_activity_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS threads_recent ON threads (is_pinned DESC, last_activity_at DESC)",
    "CREATE INDEX IF NOT EXISTS threads_top ON threads (vote_count DESC)",
    "CREATE TABLE IF NOT EXISTS replies (
        id BLOB PRIMARY KEY,
        thread_id BLOB NOT NULL,
        content TEXT NOT NULL,
        author_id TEXT NOT NULL,
        author_name TEXT NOT NULL,
        author_avatar TEXT,
        vote_count INTEGER NOT NULL DEFAULT 0,
        upvotes INTEGER NOT NULL DEFAULT 0,
        downvotes INTEGER NOT NULL DEFAULT 0,
        is_accepted INTEGER NOT NULL DEFAULT 0,
        images TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS replies_by_thread ON replies (thread_id, created_at)",
    "CREATE TABLE IF NOT EXISTS thread_votes (
        thread_id BLOB NOT NULL,
        user_id TEXT NOT NULL,
        vote INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (thread_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS reply_votes (
        reply_id BLOB NOT NULL,
        user_id TEXT NOT NULL,
        vote INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (reply_id, user_id)
    )",
];

pub struct SqliteForumRepo {
    pool: SqlitePool,
    /// Last timestamp handed out, in microseconds
    last_stamp: AtomicI64,
}

// Helper for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(blob).map_err(|e| ForumError::Transient(format!("corrupt id column: {e}")))
}

fn db_err(err: sqlx::Error) -> ForumError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => ForumError::Conflict(db.message().to_string()),
        _ => ForumError::Transient(err.to_string()),
    }
}

fn json_err(err: serde_json::Error) -> ForumError {
    ForumError::Transient(format!("corrupt json column: {err}"))
}

fn micros_to_time(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ForumError::Transient(format!("timestamp out of range: {micros}")))
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(db_err)
}

fn json_col<T: serde::de::DeserializeOwned>(row: &SqliteRow, name: &str) -> Result<T> {
    serde_json::from_str(&col::<String>(row, name)?).map_err(json_err)
}

fn tally_from_row(row: &SqliteRow) -> Result<VoteTally> {
    Ok(VoteTally {
        vote_count: col(row, "vote_count")?,
        upvotes: col(row, "upvotes")?,
        downvotes: col(row, "downvotes")?,
    })
}

fn thread_from_row(row: &SqliteRow) -> Result<Thread> {
    Ok(Thread {
        id: blob_to_uuid(&col::<Vec<u8>>(row, "id")?)?,
        title: col(row, "title")?,
        content: col(row, "content")?,
        author_id: col(row, "author_id")?,
        author_name: col(row, "author_name")?,
        author_avatar: col(row, "author_avatar")?,
        category: Category::from_str(&col::<String>(row, "category")?)?,
        tags: json_col(row, "tags")?,
        is_pinned: col(row, "is_pinned")?,
        is_locked: col(row, "is_locked")?,
        view_count: col(row, "view_count")?,
        reply_count: col(row, "reply_count")?,
        votes: tally_from_row(row)?,
        images: json_col(row, "images")?,
        created_at: micros_to_time(col(row, "created_at")?)?,
        updated_at: micros_to_time(col(row, "updated_at")?)?,
        last_activity_at: micros_to_time(col(row, "last_activity_at")?)?,
    })
}

fn reply_from_row(row: &SqliteRow) -> Result<Reply> {
    Ok(Reply {
        id: blob_to_uuid(&col::<Vec<u8>>(row, "id")?)?,
        thread_id: blob_to_uuid(&col::<Vec<u8>>(row, "thread_id")?)?,
        content: col(row, "content")?,
        author_id: col(row, "author_id")?,
        author_name: col(row, "author_name")?,
        author_avatar: col(row, "author_avatar")?,
        votes: tally_from_row(row)?,
        is_accepted: col(row, "is_accepted")?,
        images: json_col(row, "images")?,
        created_at: micros_to_time(col(row, "created_at")?)?,
        updated_at: micros_to_time(col(row, "updated_at")?)?,
    })
}

/// Table layout for one kind of vote subject.
struct SubjectTables {
    /// Table holding the subject's counters
    subject: &'static str,
    /// Sub-collection of vote records
    votes: &'static str,
    /// Column in `votes` pointing at the subject
    key: &'static str,
    subject_id: Uuid,
    /// Parent thread a reply must belong to
    parent: Option<Uuid>,
}

impl SubjectTables {
    fn for_subject(subject: VoteSubject) -> Self {
        match subject {
            VoteSubject::Thread(id) => Self {
                subject: "threads",
                votes: "thread_votes",
                key: "thread_id",
                subject_id: id,
                parent: None,
            },
            VoteSubject::Reply { thread_id, reply_id } => Self {
                subject: "replies",
                votes: "reply_votes",
                key: "reply_id",
                subject_id: reply_id,
                parent: Some(thread_id),
            },
        }
    }

    fn not_found(&self) -> ForumError {
        match self.parent {
            None => ForumError::thread_not_found(self.subject_id),
            Some(_) => ForumError::reply_not_found(self.subject_id),
        }
    }
}

impl SqliteForumRepo {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    ///
    /// SQLite serializes writers, so the pool holds a single connection; this
    /// also keeps `sqlite::memory:` databases alive for the pool's lifetime.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let repo = Self {
            pool,
            last_stamp: AtomicI64::new(0),
        };
        repo.migrate().await?;
        info!("sqlite forum store ready");
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Store-side clock in microseconds, strictly increasing across calls.
    fn server_time(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

#[async_trait]
impl ForumRepo for SqliteForumRepo {
    async fn insert_thread(&self, new: NewThread) -> Result<Thread> {
        let id = Uuid::now_v7();
        let now = self.server_time();

        sqlx::query(
            "INSERT INTO threads (id, title, content, author_id, author_name, author_avatar, category, tags, images, created_at, updated_at, last_activity_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(id))
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.author_id)
        .bind(&new.author_name)
        .bind(&new.author_avatar)
        .bind(new.category.as_str())
        .bind(serde_json::to_string(&new.tags).map_err(json_err)?)
        .bind(serde_json::to_string(&new.images).map_err(json_err)?)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.find_thread(id)
            .await?
            .ok_or_else(|| ForumError::thread_not_found(id))
    }

    async fn find_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        sqlx::query("SELECT * FROM threads WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(thread_from_row)
            .transpose()
    }

    async fn list_threads(&self, category: Option<Category>, sort_by: SortBy, limit: usize) -> Result<Vec<Thread>> {
        let mut sql = String::from("SELECT * FROM threads");
        if category.is_some() {
            sql.push_str(" WHERE category = ?");
        }
        sql.push_str(match sort_by {
            SortBy::Recent => " ORDER BY is_pinned DESC, last_activity_at DESC, id DESC",
            SortBy::Top => " ORDER BY vote_count DESC, id ASC",
            SortBy::Trending => " ORDER BY id ASC",
        });
        sql.push_str(" LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(category) = category {
            query = query.bind(category.as_str());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(thread_from_row)
            .collect()
    }

    async fn increment_view_count(&self, id: ThreadId) -> Result<()> {
        let done = sqlx::query("UPDATE threads SET view_count = view_count + 1 WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(ForumError::thread_not_found(id));
        }
        Ok(())
    }

    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<()> {
        let tags = patch
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        let done = sqlx::query(
            "UPDATE threads SET
                title = COALESCE(?, title),
                content = COALESCE(?, content),
                category = COALESCE(?, category),
                tags = COALESCE(?, tags),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.title)
        .bind(patch.content)
        .bind(patch.category.map(|c| c.as_str()))
        .bind(tags)
        .bind(self.server_time())
        .bind(uuid_to_blob(id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(ForumError::thread_not_found(id));
        }
        Ok(())
    }

    async fn set_thread_flag(&self, id: ThreadId, flag: ThreadFlag, value: bool) -> Result<()> {
        let column = match flag {
            ThreadFlag::Pinned => "is_pinned",
            ThreadFlag::Locked => "is_locked",
        };
        let done = sqlx::query(&format!("UPDATE threads SET {column} = ?, updated_at = ? WHERE id = ?"))
            .bind(value)
            .bind(self.server_time())
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(ForumError::thread_not_found(id));
        }
        Ok(())
    }

    /// Deletes the thread and everything it owns in one transaction.
    ///
    /// # Developer Note
    /// Reply votes go first because they are only reachable through the
    /// replies; if any statement fails the transaction rolls back on drop and
    /// nothing is orphaned.
    async fn delete_thread_cascade(&self, id: ThreadId) -> Result<DeletedThread> {
        let key = uuid_to_blob(id);
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let thread = sqlx::query("SELECT * FROM threads WHERE id = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(thread_from_row)
            .transpose()?
            .ok_or_else(|| ForumError::thread_not_found(id))?;

        let mut reply_images = Vec::new();
        let rows = sqlx::query("SELECT images FROM replies WHERE thread_id = ?")
            .bind(&key)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        for row in &rows {
            reply_images.extend(json_col::<Vec<String>>(row, "images")?);
        }

        sqlx::query("DELETE FROM reply_votes WHERE reply_id IN (SELECT id FROM replies WHERE thread_id = ?)")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let replies = sqlx::query("DELETE FROM replies WHERE thread_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let votes = sqlx::query("DELETE FROM thread_votes WHERE thread_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        debug!(
            thread_id = %id,
            replies = replies.rows_affected(),
            votes = votes.rows_affected(),
            "thread documents removed"
        );
        Ok(DeletedThread { thread, reply_images })
    }

    /// Inserts the reply and bumps the parent in one transaction.
    async fn insert_reply(&self, thread_id: ThreadId, new: NewReply) -> Result<Reply> {
        let id = Uuid::now_v7();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        // Stamped inside the transaction so commit order matches stamp order.
        let now = self.server_time();

        let bumped = sqlx::query(
            "UPDATE threads SET reply_count = reply_count + 1, last_activity_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(uuid_to_blob(thread_id))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if bumped.rows_affected() == 0 {
            return Err(ForumError::thread_not_found(thread_id));
        }

        sqlx::query(
            "INSERT INTO replies (id, thread_id, content, author_id, author_name, author_avatar, images, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(id))
        .bind(uuid_to_blob(thread_id))
        .bind(&new.content)
        .bind(&new.author_id)
        .bind(&new.author_name)
        .bind(&new.author_avatar)
        .bind(serde_json::to_string(&new.images).map_err(json_err)?)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Reply {
            id,
            thread_id,
            content: new.content,
            author_id: new.author_id,
            author_name: new.author_name,
            author_avatar: new.author_avatar,
            votes: VoteTally::default(),
            is_accepted: false,
            images: new.images,
            created_at: micros_to_time(now)?,
            updated_at: micros_to_time(now)?,
        })
    }

    async fn find_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Option<Reply>> {
        sqlx::query("SELECT * FROM replies WHERE id = ? AND thread_id = ?")
            .bind(uuid_to_blob(reply_id))
            .bind(uuid_to_blob(thread_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(reply_from_row)
            .transpose()
    }

    async fn list_replies(&self, thread_id: ThreadId, sort: ReplySort) -> Result<Vec<Reply>> {
        let order = match sort {
            ReplySort::Oldest => "created_at ASC",
            ReplySort::Newest => "created_at DESC",
            ReplySort::Top => "vote_count DESC, created_at ASC",
        };
        sqlx::query(&format!("SELECT * FROM replies WHERE thread_id = ? ORDER BY {order}"))
            .bind(uuid_to_blob(thread_id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(reply_from_row)
            .collect()
    }

    async fn update_reply(&self, thread_id: ThreadId, reply_id: ReplyId, patch: ReplyPatch) -> Result<()> {
        let done = sqlx::query(
            "UPDATE replies SET content = COALESCE(?, content), updated_at = ? WHERE id = ? AND thread_id = ?",
        )
        .bind(patch.content)
        .bind(self.server_time())
        .bind(uuid_to_blob(reply_id))
        .bind(uuid_to_blob(thread_id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(ForumError::reply_not_found(reply_id));
        }
        Ok(())
    }

    async fn set_reply_accepted(&self, thread_id: ThreadId, reply_id: ReplyId, accepted: bool) -> Result<()> {
        let done = sqlx::query("UPDATE replies SET is_accepted = ?, updated_at = ? WHERE id = ? AND thread_id = ?")
            .bind(accepted)
            .bind(self.server_time())
            .bind(uuid_to_blob(reply_id))
            .bind(uuid_to_blob(thread_id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(ForumError::reply_not_found(reply_id));
        }
        Ok(())
    }

    async fn delete_reply(&self, thread_id: ThreadId, reply_id: ReplyId) -> Result<Reply> {
        let key = uuid_to_blob(reply_id);
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let reply = sqlx::query("SELECT * FROM replies WHERE id = ? AND thread_id = ?")
            .bind(&key)
            .bind(uuid_to_blob(thread_id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(reply_from_row)
            .transpose()?
            .ok_or_else(|| ForumError::reply_not_found(reply_id))?;

        sqlx::query("DELETE FROM reply_votes WHERE reply_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM replies WHERE id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE threads SET reply_count = MAX(reply_count - 1, 0) WHERE id = ?")
            .bind(uuid_to_blob(thread_id))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(reply)
    }

    async fn find_vote(&self, subject: VoteSubject, user_id: &str) -> Result<Option<Vote>> {
        let tables = SubjectTables::for_subject(subject);
        let row = sqlx::query(&format!(
            "SELECT user_id, vote, created_at FROM {} WHERE {} = ? AND user_id = ?",
            tables.votes, tables.key
        ))
        .bind(uuid_to_blob(tables.subject_id))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(Vote {
                user_id: col(&row, "user_id")?,
                value: VoteValue::try_from(col::<i64>(&row, "vote")?)?,
                created_at: micros_to_time(col(&row, "created_at")?)?,
            })
        })
        .transpose()
    }

    /// Re-reads the voter's record inside the transaction and refuses to
    /// apply a transition decided from a record that has since changed.
    async fn commit_vote(&self, subject: VoteSubject, user_id: &str, transition: VoteTransition) -> Result<()> {
        let tables = SubjectTables::for_subject(subject);
        let subject_key = uuid_to_blob(tables.subject_id);
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = self.server_time();

        let exists = match tables.parent {
            None => sqlx::query("SELECT 1 FROM threads WHERE id = ?")
                .bind(&subject_key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?,
            Some(thread_id) => sqlx::query("SELECT 1 FROM replies WHERE id = ? AND thread_id = ?")
                .bind(&subject_key)
                .bind(uuid_to_blob(thread_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?,
        };
        if exists.is_none() {
            return Err(tables.not_found());
        }

        let current = sqlx::query(&format!(
            "SELECT vote FROM {} WHERE {} = ? AND user_id = ?",
            tables.votes, tables.key
        ))
        .bind(&subject_key)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .map(|row| col::<i64>(&row, "vote").and_then(VoteValue::try_from))
        .transpose()?;

        if current != transition.previous {
            return Err(ForumError::Conflict(format!(
                "vote by {user_id} on {subject} changed since it was read"
            )));
        }

        let (votes, key) = (tables.votes, tables.key);
        let sql = match transition.record {
            RecordChange::Create(_) => format!("INSERT INTO {votes} ({key}, user_id, vote, created_at) VALUES (?, ?, ?, ?)"),
            RecordChange::Flip(_) => format!("UPDATE {votes} SET vote = ? WHERE {key} = ? AND user_id = ?"),
            RecordChange::Remove => format!("DELETE FROM {votes} WHERE {key} = ? AND user_id = ?"),
        };
        let record = match transition.record {
            RecordChange::Create(value) => sqlx::query(&sql)
                .bind(&subject_key)
                .bind(user_id)
                .bind(value.as_i64())
                .bind(now),
            RecordChange::Flip(value) => sqlx::query(&sql).bind(value.as_i64()).bind(&subject_key).bind(user_id),
            RecordChange::Remove => sqlx::query(&sql).bind(&subject_key).bind(user_id),
        };
        record.execute(&mut *tx).await.map_err(db_err)?;

        let delta = transition.delta;
        sqlx::query(&format!(
            "UPDATE {} SET vote_count = vote_count + ?, upvotes = upvotes + ?, downvotes = downvotes + ? WHERE id = ?",
            tables.subject
        ))
        .bind(delta.vote_count)
        .bind(delta.upvotes)
        .bind(delta.downvotes)
        .bind(&subject_key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn forum_stats(&self) -> Result<ForumStats> {
        let rows = sqlx::query(
            "SELECT category,
                    COUNT(*) AS threads,
                    COALESCE(SUM(reply_count), 0) AS replies,
                    COALESCE(SUM(view_count), 0) AS views
             FROM threads GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stats = ForumStats::empty();
        for row in &rows {
            let category = Category::from_str(&col::<String>(row, "category")?)?;
            let threads = u64::try_from(col::<i64>(row, "threads")?).unwrap_or(0);
            stats.total_threads += threads;
            stats.total_replies += col::<i64>(row, "replies")?;
            stats.total_views += col::<i64>(row, "views")?;
            stats.category_stats.insert(category, threads);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_core::reconcile;

    fn new_thread(title: &str, category: Category) -> NewThread {
        NewThread {
            title: title.to_string(),
            content: "OP".to_string(),
            author_id: "author".to_string(),
            author_name: "Author".to_string(),
            author_avatar: None,
            category,
            tags: ["safety".to_string()].into_iter().collect(),
            images: vec!["/static/uploads/forum/threads/author/1_0".to_string()],
        }
    }

    fn new_reply() -> NewReply {
        NewReply {
            content: "reply".to_string(),
            author_id: "replier".to_string(),
            author_name: "Replier".to_string(),
            author_avatar: Some("https://avatars.test/r.png".to_string()),
            images: vec!["/static/uploads/forum/replies/t/replier/2_0".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_and_get_thread() {
        let repo = SqliteForumRepo::new("sqlite::memory:").await.unwrap();

        let thread = repo.insert_thread(new_thread("Hello", Category::General)).await.expect("Failed to create thread");
        let stored = repo.find_thread(thread.id).await.unwrap().unwrap();

        assert_eq!(stored, thread);
        assert_eq!(stored.tags.len(), 1);
        assert_eq!(stored.votes, VoteTally::default());
        assert!(repo.find_thread(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vote_commit_checks_previous_record() {
        let repo = SqliteForumRepo::new("sqlite::memory:").await.unwrap();
        let thread = repo.insert_thread(new_thread("Hello", Category::General)).await.unwrap();
        let subject = VoteSubject::Thread(thread.id);

        repo.commit_vote(subject, "a", reconcile(None, VoteValue::Up)).await.unwrap();
        let stale = repo.commit_vote(subject, "a", reconcile(None, VoteValue::Up)).await;
        assert!(matches!(stale, Err(ForumError::Conflict(_))));

        repo.commit_vote(subject, "a", reconcile(Some(VoteValue::Up), VoteValue::Down))
            .await
            .unwrap();
        let stored = repo.find_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(stored.votes, VoteTally { vote_count: -1, upvotes: 0, downvotes: 1 });
        assert_eq!(repo.find_vote(subject, "a").await.unwrap().unwrap().value, VoteValue::Down);
    }

    #[tokio::test]
    async fn cascade_delete_leaves_nothing_behind() {
        let repo = SqliteForumRepo::new("sqlite::memory:").await.unwrap();
        let thread = repo.insert_thread(new_thread("Hello", Category::Help)).await.unwrap();
        let reply = repo.insert_reply(thread.id, new_reply()).await.unwrap();
        let reply_subject = VoteSubject::Reply {
            thread_id: thread.id,
            reply_id: reply.id,
        };
        repo.commit_vote(VoteSubject::Thread(thread.id), "a", reconcile(None, VoteValue::Up))
            .await
            .unwrap();
        repo.commit_vote(reply_subject, "b", reconcile(None, VoteValue::Down))
            .await
            .unwrap();

        let deleted = repo.delete_thread_cascade(thread.id).await.unwrap();
        assert_eq!(deleted.reply_images, reply.images);

        for table in ["threads", "replies", "thread_votes", "reply_votes"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&repo.pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{table} not empty");
        }
    }

    #[tokio::test]
    async fn reply_lifecycle_keeps_reply_count() {
        let repo = SqliteForumRepo::new("sqlite::memory:").await.unwrap();
        let thread = repo.insert_thread(new_thread("Hello", Category::Help)).await.unwrap();

        let reply = repo.insert_reply(thread.id, new_reply()).await.unwrap();
        let bumped = repo.find_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(bumped.reply_count, 1);
        assert!(bumped.last_activity_at > thread.last_activity_at);

        repo.set_reply_accepted(thread.id, reply.id, true).await.unwrap();
        assert!(repo.find_reply(thread.id, reply.id).await.unwrap().unwrap().is_accepted);

        repo.delete_reply(thread.id, reply.id).await.unwrap();
        assert_eq!(repo.find_thread(thread.id).await.unwrap().unwrap().reply_count, 0);
        assert!(matches!(
            repo.insert_reply(Uuid::now_v7(), new_reply()).await,
            Err(ForumError::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn listing_filters_and_orders() {
        let repo = SqliteForumRepo::new("sqlite::memory:").await.unwrap();
        let a = repo.insert_thread(new_thread("a", Category::Help)).await.unwrap();
        let b = repo.insert_thread(new_thread("b", Category::Help)).await.unwrap();
        repo.insert_thread(new_thread("c", Category::General)).await.unwrap();
        repo.commit_vote(VoteSubject::Thread(a.id), "u", reconcile(None, VoteValue::Up))
            .await
            .unwrap();
        repo.set_thread_flag(b.id, ThreadFlag::Pinned, true).await.unwrap();

        let help = repo.list_threads(Some(Category::Help), SortBy::Recent, 20).await.unwrap();
        assert_eq!(help.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);

        let top = repo.list_threads(None, SortBy::Top, 20).await.unwrap();
        assert_eq!(top[0].id, a.id);
        assert!(top.windows(2).all(|w| w[0].votes.vote_count >= w[1].votes.vote_count));

        assert_eq!(repo.list_threads(None, SortBy::Recent, 2).await.unwrap().len(), 2);

        let stats = repo.forum_stats().await.unwrap();
        assert_eq!(stats.total_threads, 3);
        assert_eq!(stats.category_stats[&Category::Help], 2);
        assert_eq!(stats.category_stats[&Category::BugReport], 0);
    }

    #[tokio::test]
    async fn concurrent_replies_keep_activity_at_the_latest_reply() {
        let repo = std::sync::Arc::new(SqliteForumRepo::new("sqlite::memory:").await.unwrap());
        let thread = repo.insert_thread(new_thread("Busy", Category::General)).await.unwrap();

        let writers = (0..16).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.insert_reply(thread.id, new_reply()).await })
        });
        for writer in writers.collect::<Vec<_>>() {
            writer.await.unwrap().unwrap();
        }

        let stored = repo.find_thread(thread.id).await.unwrap().unwrap();
        let replies = repo.list_replies(thread.id, ReplySort::Newest).await.unwrap();
        assert_eq!(stored.reply_count, 16);
        assert_eq!(replies.len(), 16);
        assert_eq!(stored.last_activity_at, replies[0].created_at);
        assert!(replies.iter().all(|r| r.created_at <= stored.last_activity_at));
    }
}
