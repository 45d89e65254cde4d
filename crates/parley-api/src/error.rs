//! API error types and JSON error response formatting.
//!
//! Every failing endpoint answers with `{"error": <message>, "code": <code>}`
//! and a status code matching the failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use parley_chat::ChatError;
use parley_core::error::ParleyError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code (e.g., "bad_request").
    pub code: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 422 Unprocessable Entity - well-formed input that could not be used
    /// (e.g. audio nobody could transcribe).
    UnprocessableEntity(String),
    /// 500 Internal Server Error.
    Internal(String),
    /// 503 Service Unavailable - shutting down.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        if status.is_server_error() {
            tracing::error!(code, error = %message, "Request failed");
        }

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::InvalidConversationId(_) => ApiError::BadRequest(err.to_string()),
            ParleyError::ShuttingDown => ApiError::ServiceUnavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage => ApiError::BadRequest("No message provided".to_string()),
            ChatError::InvalidImage(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
