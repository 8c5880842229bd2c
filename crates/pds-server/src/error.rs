//! Maps `PdsError` onto XRPC-style HTTP responses (§7). Nothing below this
//! module knows about HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pds_core::PdsError;
use serde_json::json;

#[derive(Debug)]
pub struct XrpcError {
    pub status: StatusCode,
    pub error_name: String,
    pub message: String,
}

impl XrpcError {
    pub fn new(status: StatusCode, error_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error_name: error_name.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for XrpcError {
    fn into_response(self) -> Response {
        if matches!(self.status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self.error_name, message = %self.message, "request failed");
        }
        let body = json!({
            "error": self.error_name,
            "message": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

impl From<PdsError> for XrpcError {
    fn from(err: PdsError) -> Self {
        match &err {
            PdsError::InvalidInput(_) => {
                XrpcError::new(StatusCode::BAD_REQUEST, "InvalidRequest", err.to_string())
            }
            PdsError::NotFound(_) => XrpcError::new(StatusCode::NOT_FOUND, "NotFound", err.to_string()),
            PdsError::Conflict(_) => XrpcError::new(StatusCode::CONFLICT, "Conflict", err.to_string()),
            PdsError::IntegrityError(_) => {
                XrpcError::new(StatusCode::INTERNAL_SERVER_ERROR, "IntegrityError", err.to_string())
            }
            PdsError::Transient(_) => {
                XrpcError::new(StatusCode::SERVICE_UNAVAILABLE, "UpstreamFailure", err.to_string())
            }
            PdsError::CursorOutOfRange(_) => {
                XrpcError::new(StatusCode::BAD_REQUEST, "InvalidRequest", err.to_string())
            }
            PdsError::ConsumerTooSlow => {
                XrpcError::new(StatusCode::BAD_REQUEST, "ConsumerTooSlow", err.to_string())
            }
            PdsError::Storage(_) => {
                XrpcError::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", err.to_string())
            }
            PdsError::Crypto(_) => {
                XrpcError::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", err.to_string())
            }
        }
    }
}
