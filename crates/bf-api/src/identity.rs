//! Caller identity.
//!
//! Sign-in happens upstream; the gateway in front of this service forwards
//! the verified user in `x-user-*` headers. A request without `x-user-id` is
//! anonymous and can only read.

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use bf_core::{Role, User};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_AVATAR_HEADER: &str = "x-user-avatar";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The signed-in user, if any.
#[derive(Debug, Clone)]
pub struct Identity(pub Option<User>);

impl Identity {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = header(req, USER_ID_HEADER).map(|id| User {
            id,
            display_name: header(req, USER_NAME_HEADER),
            avatar_url: header(req, USER_AVATAR_HEADER),
            role: match header(req, USER_ROLE_HEADER).as_deref() {
                Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
                _ => Role::Member,
            },
        });
        ready(Ok(Identity(user)))
    }
}
