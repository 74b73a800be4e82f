use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// The body shape all error responses share. Clients decode it to surface
/// the human-readable message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Writes an object as a JSON response with an explicit utf-8 content type.
pub(crate) fn write_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(buf) => (status, [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)], buf).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode response object");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Writes an error message to the caller.
pub(crate) fn write_error(status: StatusCode, message: &str) -> Response {
    write_json(
        status,
        &ErrorMessage {
            message: message.to_string(),
        },
    )
}
