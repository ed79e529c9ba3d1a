//! # bf-api
//!
//! The JSON HTTP surface for the forum.

pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;

use actix_web::web;
use bf_core::ForumError;

use crate::error::ApiError;

/// Configures the forum routes.
///
/// # Developer Note
/// Everything lives under a single scope so the binary can mount the API
/// next to the static upload directory without the two colliding.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let json_errors = web::JsonConfig::default()
        .error_handler(|err, _req| ApiError(ForumError::Validation(err.to_string())).into());
    let query_errors = web::QueryConfig::default()
        .error_handler(|err, _req| ApiError(ForumError::Validation(err.to_string())).into());
    let path_errors = web::PathConfig::default()
        .error_handler(|err, _req| ApiError(ForumError::Validation(err.to_string())).into());

    cfg.app_data(json_errors)
        .app_data(query_errors)
        .app_data(path_errors)
        .service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/stats", web::get().to(handlers::forum_stats))
            .service(
                web::resource("/threads")
                    .route(web::get().to(handlers::list_threads))
                    .route(web::post().to(handlers::create_thread)),
            )
            .service(
                web::resource("/threads/{thread_id}")
                    .route(web::get().to(handlers::get_thread))
                    .route(web::patch().to(handlers::update_thread))
                    .route(web::delete().to(handlers::delete_thread)),
            )
            .route("/threads/{thread_id}/pin", web::put().to(handlers::pin_thread))
            .route("/threads/{thread_id}/lock", web::put().to(handlers::lock_thread))
            .route("/threads/{thread_id}/votes", web::post().to(handlers::vote_on_thread))
            .route("/threads/{thread_id}/votes/me", web::get().to(handlers::my_thread_vote))
            .service(
                web::resource("/threads/{thread_id}/replies")
                    .route(web::get().to(handlers::list_replies))
                    .route(web::post().to(handlers::create_reply)),
            )
            .service(
                web::resource("/threads/{thread_id}/replies/{reply_id}")
                    .route(web::patch().to(handlers::update_reply))
                    .route(web::delete().to(handlers::delete_reply)),
            )
            .route(
                "/threads/{thread_id}/replies/{reply_id}/accepted",
                web::put().to(handlers::accept_reply),
            )
            .route(
                "/threads/{thread_id}/replies/{reply_id}/votes",
                web::post().to(handlers::vote_on_reply),
            )
            .route(
                "/threads/{thread_id}/replies/{reply_id}/votes/me",
                web::get().to(handlers::my_reply_vote),
            ),
    );
}
