//! Shared-token authentication for the worker job protocol.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::server::app::AppState;

/// Header workers send on every protocol request.
pub const WORKER_TOKEN_HEADER: &str = "x-worker-token";

/// Reject protocol requests whose token does not match.
pub async fn worker_auth(request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<AppState>() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let provided = request
        .headers()
        .get(WORKER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(state.worker_token.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid worker token" })),
        )
            .into_response();
    }

    next.run(request).await
}
