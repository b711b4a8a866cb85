use axum::{
    extract::multipart::MultipartError,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::queries::JobError;
use crate::db::user_queries::UserError;
use crate::services::auth::AuthError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(#[from] garde::Report),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        ApiError::Unauthorized("Authentication credentials were not provided or are invalid".to_string())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            ApiError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            ApiError::Multipart(err) => match err.status() {
                StatusCode::PAYLOAD_TOO_LARGE => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
                _ => (StatusCode::BAD_REQUEST, "multipart_error"),
            },
            ApiError::Job(err) => match err {
                JobError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                JobError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                JobError::EmptySlot(_) => (StatusCode::BAD_REQUEST, "empty_slot"),
                JobError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            ApiError::User(err) => match err {
                UserError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                UserError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                UserError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            ApiError::Auth(err) => match err {
                AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "unauthorized"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "auth_error"),
            },
            ApiError::Storage(err) => match err {
                StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
            ApiError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => ApiError::UnsupportedMediaType(rejection.body_text()),
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(rejection.body_text()),
            _ => ApiError::BadRequest(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let error = if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorBody { error, code })).into_response()
    }
}
