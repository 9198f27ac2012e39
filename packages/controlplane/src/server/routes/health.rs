use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: ComponentHealth,
    kv_store: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error),
        }
    }
}

/// Health check endpoint
///
/// Checks database connectivity and KV-store reachability. Returns 200 OK
/// when healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db_pool {
        Some(pool) => match tokio::time::timeout(
            std::time::Duration::from_secs(5),
            sqlx::query("SELECT 1").execute(pool),
        )
        .await
        {
            Ok(Ok(_)) => ComponentHealth::ok(),
            Ok(Err(e)) => ComponentHealth::error(format!("Query failed: {}", e)),
            Err(_) => ComponentHealth::error("Query timeout (>5s)".to_string()),
        },
        None => ComponentHealth::ok(),
    };

    let kv_store = match state.kernel.kv.get("health:probe").await {
        Ok(_) => ComponentHealth::ok(),
        Err(e) => ComponentHealth::error(e.to_string()),
    };

    let is_healthy = database.status == "ok" && kv_store.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            database,
            kv_store,
        }),
    )
}
