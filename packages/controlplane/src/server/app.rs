//! Application setup and server configuration.

use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::kernel::ControlKernel;
use crate::server::middleware::worker_auth;
use crate::server::routes::{health_handler, jobs};

/// Shared state for all request handlers
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<ControlKernel>,
    /// Shared token workers must present.
    pub worker_token: String,
    /// Present in production wiring; used by the health check.
    pub db_pool: Option<PgPool>,
}

/// Build the application router
pub fn build_app(state: AppState) -> Router {
    let protocol = Router::new()
        .route("/:endpoint/job-take/:worker_id", get(jobs::job_take))
        .route(
            "/:endpoint/job-take-batch/:worker_id",
            get(jobs::job_take_batch),
        )
        .route("/:endpoint/ping/:worker_id", get(jobs::ping))
        .route(
            "/:endpoint/job-done/:worker_id/:task_id",
            post(jobs::job_done),
        )
        .route(
            "/:endpoint/job-stream/:worker_id/:task_id",
            post(jobs::job_stream),
        )
        .layer(axum::middleware::from_fn(worker_auth));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v2", protocol)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
