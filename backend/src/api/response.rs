//! Standardized API error body
//!
//! Successful registry responses keep their wire shape (a bare JSON array or
//! an HTML page); failures are wrapped in this envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Body of a failed API request
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Always `false`
    pub success: bool,
    pub error: ApiError,
}

/// Error details in API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ApiResponse {
    /// Create an error response
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            error: ApiError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "INVALID_MEMBER" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
