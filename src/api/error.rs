use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::accounts::AccountsError;
use crate::api::response::write_error;
use crate::promoter::AssignError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    // The accounts service rejected the caller. Reported as a 400 for
    // compatibility with existing consumers.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::Unauthorized(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        write_error(status, &self.to_string())
    }
}

impl From<AccountsError> for ApiError {
    fn from(err: AccountsError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<AssignError> for ApiError {
    fn from(err: AssignError) -> Self {
        match err {
            AssignError::UnknownServer => {
                ApiError::NotFound("no server matches the given name".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(err: mongodb::error::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
