//! Error types shared by the registry service and the peer runtime

use axum::response::{IntoResponse, Response};

use crate::api::response::ApiResponse;
use crate::clocksync::ClockSyncError;
use crate::registry::RegistryError;

pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the HTTP API
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppError {
    /// Machine-readable code used in the JSON error body
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Registry(RegistryError::InvalidMember(_)) => "INVALID_MEMBER",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!("request rejected: {}", self);
        ApiResponse::error(self.code(), self.to_string()).into_response()
    }
}

/// Errors raised while a peer joins or runs its steady state
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("clock synchronization failed: {0}")]
    ClockSync(#[from] ClockSyncError),

    #[error("failed to bind UDP endpoint {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry rejected registration with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
