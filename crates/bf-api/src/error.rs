//! JSON envelope and the mapping from `ForumError` to HTTP status codes.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bf_core::ForumError;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Every response body: `{"success": true, "data": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::data(data))
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope::data(data))
}

/// Wraps `ForumError` so it can implement actix's `ResponseError`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ForumError);

pub type ApiResult = Result<HttpResponse, ApiError>;

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            ForumError::NotFound(..) => StatusCode::NOT_FOUND,
            ForumError::Validation(_) => StatusCode::BAD_REQUEST,
            ForumError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ForumError::Conflict(_) => StatusCode::CONFLICT,
            ForumError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        HttpResponse::build(status).json(Envelope::error(self.0.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (ForumError::thread_not_found("x"), 404),
            (ForumError::Validation("v".into()), 400),
            (ForumError::Unauthorized("u".into()), 403),
            (ForumError::Conflict("c".into()), 409),
            (ForumError::Transient("t".into()), 503),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code().as_u16(), status);
        }
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let body = serde_json::to_value(Envelope::error("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "error": "nope" }));
        let body = serde_json::to_value(Envelope::data(3)).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "data": 3 }));
    }
}
