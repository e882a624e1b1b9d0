//! HTTP error mapping.

use crate::error::{BalloonError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or query parameter (400).
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found outside the engine's own errors (404).
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] BalloonError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Engine(e) => match e.kind() {
                ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ErrorKind::InvalidInput => match e {
                    BalloonError::UploadTooLarge { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
                    }
                    _ => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                },
                ErrorKind::ProcessingFailure => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_FAILURE")
                }
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, "{}", self);
        } else {
            tracing::debug!(code, "{}", self);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_by_kind() {
        let cases = [
            (
                ApiError::from(BalloonError::Conflict {
                    hash: "h".into(),
                    job_id: "j".into(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(BalloonError::JobNotFound { job_id: "j".into() }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(BalloonError::NotAPdf { magic: vec![0] }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(BalloonError::UploadTooLarge { size: 2, max: 1 }),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ApiError::from(BalloonError::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_and_code().0, status, "{err}");
        }
    }
}
