//! REST error envelope
//!
//! Error responses carry `{"code": N, "type": "...", "message": "..."}`
//! where `code` is the numeric error code (1001 illegal argument, 1002
//! internal, 1003 not found) and the HTTP status follows [`VendError`].

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credvend_common::VendError;
use serde::{Deserialize, Serialize};

/// Error returned by the credential endpoints
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub error_type: &'static str,
    pub message: String,
}

/// Wire form of an error
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i32,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl From<VendError> for ApiError {
    fn from(err: VendError) -> Self {
        let status = StatusCode::from_u16(err.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "credential vending failed");
        }
        Self {
            status,
            code: err.error_code(),
            error_type: err.error_type(),
            message: err.public_message(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        VendError::illegal_argument(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        VendError::illegal_argument(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code,
            error_type: self.error_type.to_string(),
            message: self.message,
        };
        (self.status, axum::Json(body)).into_response()
    }
}
