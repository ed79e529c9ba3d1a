//! # bf-api Handlers
//!
//! This module coordinates the flow between HTTP requests and `ForumService`.
//! Capability checks run here, before the service is called.

use std::collections::BTreeSet;
use std::str::FromStr;

use actix_web::{web, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bf_core::{
    Category, ForumError, ImageUpload, ReplyDraft, ReplyPatch, ReplySort, SortBy, ThreadDraft, ThreadId, ThreadPatch,
    ThreadQuery, VoteValue,
};
use bf_services::{policy, ForumService};
use bytes::Bytes;
use mime::Mime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{created, ok, ApiResult};
use crate::identity::Identity;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub forum: ForumService,
}

// ==================== REQUEST BODIES ====================

#[derive(Debug, Deserialize)]
pub struct ListThreadsParams {
    /// Category slug, or `all`
    pub category: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRepliesParams {
    pub sort: Option<String>,
}

/// An image sent inline as base64.
#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    pub content_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateThreadBody {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReplyBody {
    pub content: String,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize)]
pub struct FlagBody {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub value: VoteValue,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    /// The caller's vote after the request; `null` once withdrawn
    pub vote: Option<VoteValue>,
}

fn decode_images(payloads: Vec<ImagePayload>) -> Result<Vec<ImageUpload>, ForumError> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            let content_type = Mime::from_str(&payload.content_type)
                .ok()
                .filter(|m| m.type_() == mime::IMAGE)
                .ok_or_else(|| ForumError::Validation(format!("image {index} is not an image type")))?;
            let data = STANDARD
                .decode(payload.data.as_bytes())
                .map_err(|e| ForumError::Validation(format!("image {index} is not valid base64: {e}")))?;
            Ok(ImageUpload {
                data: Bytes::from(data),
                content_type,
            })
        })
        .collect()
}

fn parse_category(raw: Option<&str>) -> Result<Option<Category>, ForumError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(slug) => Category::from_str(slug).map(Some),
    }
}

// ==================== THREADS ====================

pub async fn list_threads(data: web::Data<AppState>, params: web::Query<ListThreadsParams>) -> ApiResult {
    let params = params.into_inner();
    let query = ThreadQuery {
        category: parse_category(params.category.as_deref())?,
        sort_by: params.sort.as_deref().map(SortBy::from_str).transpose()?.unwrap_or_default(),
        limit: params.limit.unwrap_or(0),
        search: params.q,
    };
    Ok(ok(data.forum.get_threads(&query).await?))
}

pub async fn create_thread(
    data: web::Data<AppState>,
    identity: Identity,
    body: web::Json<CreateThreadBody>,
) -> ApiResult {
    let user = policy::require_user(identity.user())?;
    let body = body.into_inner();
    let draft = ThreadDraft {
        title: body.title,
        content: body.content,
        category: body.category,
        tags: body.tags,
        images: decode_images(body.images)?,
    };
    policy::validate_thread_draft(&draft)?;
    policy::ensure_can_post_in(user, draft.category)?;

    let thread = data.forum.create_thread(draft, user).await?;
    info!(thread_id = %thread.id, user_id = %user.id, "thread created via api");
    Ok(created(thread))
}

/// Thread detail view; counts a view on every call.
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<ThreadId>) -> ApiResult {
    Ok(ok(data.forum.get_thread(path.into_inner()).await?))
}

pub async fn update_thread(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<ThreadId>,
    patch: web::Json<ThreadPatch>,
) -> ApiResult {
    let id = path.into_inner();
    let patch = patch.into_inner();
    let user = policy::require_user(identity.user())?;
    policy::validate_thread_patch(&patch)?;

    let existing = data.forum.find_thread(id).await?;
    policy::ensure_author_or_admin(user, &existing.author_id, "edit this thread")?;
    if let Some(category) = patch.category {
        policy::ensure_can_post_in(user, category)?;
    }

    data.forum.update_thread(id, patch).await?;
    Ok(ok(data.forum.find_thread(id).await?))
}

pub async fn delete_thread(data: web::Data<AppState>, identity: Identity, path: web::Path<ThreadId>) -> ApiResult {
    let id = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let existing = data.forum.find_thread(id).await?;
    policy::ensure_author_or_admin(user, &existing.author_id, "delete this thread")?;

    data.forum.delete_thread(id).await?;
    Ok(ok(json!({ "id": id })))
}

pub async fn pin_thread(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<ThreadId>,
    body: web::Json<FlagBody>,
) -> ApiResult {
    let id = path.into_inner();
    policy::ensure_admin(policy::require_user(identity.user())?, "pin threads")?;
    data.forum.toggle_pin_thread(id, body.value).await?;
    Ok(ok(data.forum.find_thread(id).await?))
}

pub async fn lock_thread(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<ThreadId>,
    body: web::Json<FlagBody>,
) -> ApiResult {
    let id = path.into_inner();
    policy::ensure_admin(policy::require_user(identity.user())?, "lock threads")?;
    data.forum.toggle_lock_thread(id, body.value).await?;
    Ok(ok(data.forum.find_thread(id).await?))
}

pub async fn vote_on_thread(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<ThreadId>,
    body: web::Json<VoteBody>,
) -> ApiResult {
    let user = policy::require_user(identity.user())?;
    let vote = data.forum.vote_on_thread(path.into_inner(), &user.id, body.value).await?;
    Ok(ok(VoteResponse { vote }))
}

pub async fn my_thread_vote(data: web::Data<AppState>, identity: Identity, path: web::Path<ThreadId>) -> ApiResult {
    let user = policy::require_user(identity.user())?;
    let vote = data.forum.get_user_thread_vote(path.into_inner(), &user.id).await;
    Ok(ok(VoteResponse { vote }))
}

// ==================== REPLIES ====================

pub async fn list_replies(
    data: web::Data<AppState>,
    path: web::Path<ThreadId>,
    params: web::Query<ListRepliesParams>,
) -> ApiResult {
    let sort = params.sort.as_deref().map(ReplySort::from_str).transpose()?.unwrap_or_default();
    Ok(ok(data.forum.get_replies(path.into_inner(), sort).await?))
}

pub async fn create_reply(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<ThreadId>,
    body: web::Json<CreateReplyBody>,
) -> ApiResult {
    let thread_id = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let body = body.into_inner();
    policy::validate_content(&body.content)?;

    let thread = data.forum.find_thread(thread_id).await?;
    policy::ensure_can_reply(user, &thread)?;

    let draft = ReplyDraft {
        content: body.content,
        images: decode_images(body.images)?,
    };
    Ok(created(data.forum.create_reply(thread_id, draft, user).await?))
}

pub async fn update_reply(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<(ThreadId, Uuid)>,
    patch: web::Json<ReplyPatch>,
) -> ApiResult {
    let (thread_id, reply_id) = path.into_inner();
    let patch = patch.into_inner();
    let user = policy::require_user(identity.user())?;
    if let Some(content) = &patch.content {
        policy::validate_content(content)?;
    }

    let existing = data.forum.find_reply(thread_id, reply_id).await?;
    policy::ensure_author_or_admin(user, &existing.author_id, "edit this reply")?;

    data.forum.update_reply(thread_id, reply_id, patch).await?;
    Ok(ok(data.forum.find_reply(thread_id, reply_id).await?))
}

pub async fn delete_reply(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<(ThreadId, Uuid)>,
) -> ApiResult {
    let (thread_id, reply_id) = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let existing = data.forum.find_reply(thread_id, reply_id).await?;
    policy::ensure_author_or_admin(user, &existing.author_id, "delete this reply")?;

    data.forum.delete_reply(thread_id, reply_id).await?;
    Ok(ok(json!({ "id": reply_id })))
}

pub async fn accept_reply(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<(ThreadId, Uuid)>,
    body: web::Json<FlagBody>,
) -> ApiResult {
    let (thread_id, reply_id) = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let thread = data.forum.find_thread(thread_id).await?;
    policy::ensure_can_accept(user, &thread)?;

    data.forum.mark_reply_as_accepted(thread_id, reply_id, body.value).await?;
    Ok(ok(data.forum.find_reply(thread_id, reply_id).await?))
}

pub async fn vote_on_reply(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<(ThreadId, Uuid)>,
    body: web::Json<VoteBody>,
) -> ApiResult {
    let (thread_id, reply_id) = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let vote = data.forum.vote_on_reply(thread_id, reply_id, &user.id, body.value).await?;
    Ok(ok(VoteResponse { vote }))
}

pub async fn my_reply_vote(
    data: web::Data<AppState>,
    identity: Identity,
    path: web::Path<(ThreadId, Uuid)>,
) -> ApiResult {
    let (thread_id, reply_id) = path.into_inner();
    let user = policy::require_user(identity.user())?;
    let vote = data.forum.get_user_reply_vote(thread_id, reply_id, &user.id).await;
    Ok(ok(VoteResponse { vote }))
}

// ==================== STATISTICS ====================

pub async fn forum_stats(data: web::Data<AppState>) -> ApiResult {
    Ok(ok(data.forum.get_forum_stats().await?))
}

pub async fn health() -> HttpResponse {
    ok(json!({ "status": "ok" }))
}
