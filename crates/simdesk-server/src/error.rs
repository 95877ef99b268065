use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use simdesk_cache::FetchError;
use thiserror::Error;

use crate::accounts::AccountError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid token")]
    InvalidToken,

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Upstream said "not modified" but there was nothing stored to serve.
    #[error("No content")]
    NoContent,

    #[error("Mirror upstream is not configured")]
    MirrorDisabled,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Account(_) | ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NoContent => StatusCode::NO_CONTENT,
            ApiError::MirrorDisabled => StatusCode::NOT_FOUND,
            ApiError::Fetch(e) => fetch_status(e),
        }
    }
}

/// Transient upstream failures are the gateway's problem; a definite
/// upstream answer such as 404 is passed through.
fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        FetchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        FetchError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
        e if e.is_transient() => StatusCode::BAD_GATEWAY,
        FetchError::Status { status } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        FetchError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
