//! bf-api middleware
//!
//! Request logging, CORS and default security headers.

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{DefaultHeaders, Logger};

use crate::identity::{USER_AVATAR_HEADER, USER_ID_HEADER, USER_NAME_HEADER, USER_ROLE_HEADER};

/// Access log line per request; routed into `tracing` by the subscriber's log bridge.
pub fn standard_middleware() -> Logger {
    Logger::new(r#"%a "%r" %s %b %Dms"#)
}

/// CORS for the browser client. `allowed_origin` of `None` allows any origin,
/// but then the role header is not accepted cross-origin: only a pinned
/// origin may present itself as an admin.
pub fn cors_policy(allowed_origin: Option<&str>) -> Cors {
    let cors = match allowed_origin {
        Some(origin) => Cors::default().allowed_origin(origin).allowed_header(USER_ROLE_HEADER),
        None => Cors::default().allow_any_origin(),
    };
    cors.allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .allowed_header(USER_ID_HEADER)
        .allowed_header(USER_NAME_HEADER)
        .allowed_header(USER_AVATAR_HEADER)
        .max_age(3600)
}

pub fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .add((header::REFERRER_POLICY, "strict-origin-when-cross-origin"))
}
