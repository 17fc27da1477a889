//! Status and health check endpoints, and the shared API error type.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use mergeway_core::errors::{ComparisonError, ResolveError, SynthesisError};

use crate::sessions::SessionAccess;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
    active_sessions: usize,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/status/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.sessions.len().await,
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response carrying
/// `{ "error": reason, "http_status": n }`.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    /// A status passed through from the remote host.
    Upstream { status: u16, message: String },
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => msg,
            AppError::Upstream { message, .. } => message,
        };

        let body = serde_json::json!({ "error": message, "http_status": status.as_u16() });
        (status, Json(body)).into_response()
    }
}

impl From<ComparisonError> for AppError {
    fn from(err: ComparisonError) -> Self {
        AppError::Upstream {
            status: err.http_status(),
            message: err.to_string(),
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownFile(_) => AppError::NotFound(err.to_string()),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<SynthesisError> for AppError {
    fn from(err: SynthesisError) -> Self {
        match err {
            SynthesisError::Unresolved { .. } | SynthesisError::IncompleteSession { .. } => {
                AppError::BadRequest(err.to_string())
            }
            SynthesisError::RefConflict { .. } => AppError::Conflict(err.to_string()),
            SynthesisError::StepFailed { .. } => AppError::Upstream {
                status: err.http_status(),
                message: err.to_string(),
            },
        }
    }
}

impl From<SessionAccess> for AppError {
    fn from(access: SessionAccess) -> Self {
        match access {
            SessionAccess::Missing => AppError::NotFound("merge session not found".into()),
            SessionAccess::Committing => {
                AppError::Conflict("merge session is being committed".into())
            }
        }
    }
}
