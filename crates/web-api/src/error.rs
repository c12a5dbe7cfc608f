use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::Domain(DomainError::InvalidArgument { field, reason }) => {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_ARGUMENT",
                    format!("{field}: {reason}"),
                )
            }
            ApplicationError::Domain(err @ DomainError::StatusRegression { .. }) => {
                ApiError::new(StatusCode::CONFLICT, "STATUS_REGRESSION", err.to_string())
            }
            ApplicationError::UnknownRoom(room) => ApiError::new(
                StatusCode::NOT_FOUND,
                "ROOM_NOT_FOUND",
                format!("room not found: {room}"),
            ),
            ApplicationError::RejectedConnection => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "authenticated user required",
            ),
            ApplicationError::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                RepositoryError::Storage { message } => ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    format!("database error: {message}"),
                ),
            },
            ApplicationError::Broadcast(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BROADCAST_ERROR",
                format!("broadcast error: {err}"),
            ),
            ApplicationError::SessionClosed => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SESSION_CLOSED",
                "session is closed",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
