//! Error type shared by stores, the autoscaler, and the HTTP layer.
//!
//! Each variant is an error kind with a stable HTTP mapping. Stores return
//! these so the job-protocol handlers can answer 409/404/503 without
//! inspecting strings; the control loop matches on kinds to decide whether
//! to log-and-continue.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// CAS lost, task already assigned or completed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Worker, task, endpoint, or deployment absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// KV, database, or orchestrator I/O failure.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Cluster cannot fit a scale-up.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Health-blocked, cooldown active, or a min/max limit hit.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Invariant violation.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => Error::Internal(db.to_string()),
            other => Error::Unavailable(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(
            Error::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            Error::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unavailable_maps_to_503() {
        assert_eq!(
            Error::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn row_not_found_becomes_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
