use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::protocol::Envelope;

/// Error type for the thin REST surface (register/login/health).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Error surface for opcode handlers (C5). Every variant is **in-band**: the
/// session stays open and the caller turns this into an `err` envelope via
/// [`GatewayError::into_envelope`]. Handshake failures, decode errors, and
/// timeouts are not represented here — those are terminal and close the
/// session directly (see `protocol::close_code` and `session`).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("store error")]
    Store(#[from] sqlx::Error),
}

impl GatewayError {
    /// The in-band numeric code carried in the `err` frame payload, per §7.
    pub fn code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 4002,
            GatewayError::Forbidden(_) => 4004,
            GatewayError::NotFound(_) => 4003,
            GatewayError::Conflict(_) => 4005,
            GatewayError::Internal(_) | GatewayError::Store(_) => 4006,
        }
    }

    /// Turns this into the in-band `err` frame sent back to the session.
    /// Non-terminal errors are counted on the `Hub` (see
    /// `Hub::record_gateway_error`), not individually logged — only terminal
    /// closes get a per-occurrence log line.
    pub fn into_envelope(self) -> Envelope {
        Envelope::error(self.code(), self.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
