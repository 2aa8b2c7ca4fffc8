//! Identity of the caller.
//!
//! Authentication happens in front of this service; the authenticated user id arrives
//! in the `x-requester-id` header. Requests without it are refused.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use pkgdeploy_core::UserId;

use crate::error::ApiError;

pub const REQUESTER_HEADER: &str = "x-requester-id";

/// The user a request acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester(pub UserId);

impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(REQUESTER_HEADER).ok_or_else(|| {
            ApiError::Unauthorized(format!("missing {} header", REQUESTER_HEADER))
        })?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|id| Requester(UserId(id)))
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {} header", REQUESTER_HEADER)))
    }
}
