//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pkgdeploy_core::ControlError;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The request does not say who it acts for.
    Unauthorized(String),
    /// A control request rejected by the scheduler.
    Control(ControlError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, rcc, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, None, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, None, msg),
            ApiError::Control(err) => {
                let status = match err {
                    ControlError::AccessDenied => StatusCode::FORBIDDEN,
                    ControlError::OutOfStateRequest => StatusCode::CONFLICT,
                    ControlError::InvalidObjectId
                    | ControlError::InvalidPackageId
                    | ControlError::InvalidJobId => StatusCode::NOT_FOUND,
                    ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Some(err.code()), err.to_string())
            }
        };

        let body = Json(json!({
            "rcc": rcc,
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError::Control(err)
    }
}
