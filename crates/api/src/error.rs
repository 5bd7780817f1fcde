//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga runtime error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg))
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        SagaError::ExecutionNotFound(_) | SagaError::UnknownQuery(_) => StatusCode::NOT_FOUND,
        SagaError::Domain(_) => StatusCode::BAD_REQUEST,
        SagaError::ExecutionNotRunning(_) | SagaError::AddressLocked(_) => StatusCode::CONFLICT,
        SagaError::Failed(failure) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": err.to_string(), "failure": failure }),
            );
        }
        _ => {
            tracing::error!(error = %err, "saga runtime error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, error_body(err.to_string()))
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
