//! Shared helpers for the integration suites: an in-memory harness plus a
//! thin HTTP client over the axum router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use controlplane_core::domains::endpoints::{Endpoint, ResourceRecipe};
use controlplane_core::domains::tasks::NewTask;
use controlplane_core::kernel::TestDependencies;
use controlplane_core::server::{build_app, AppState};
use tower::ServiceExt;

pub const WORKER_TOKEN: &str = "test-worker-token";

pub struct Harness {
    pub deps: TestDependencies,
    pub app: Router,
}

impl Harness {
    pub fn new() -> Self {
        let deps = TestDependencies::new();
        let app = build_app(AppState {
            kernel: std::sync::Arc::clone(&deps.kernel),
            worker_token: WORKER_TOKEN.to_string(),
            db_pool: None,
        });
        Self { deps, app }
    }

    /// Seed an endpoint with a 1-GPU recipe.
    pub async fn seed_endpoint(&self, name: &str) -> Endpoint {
        self.deps
            .kernel
            .recipes
            .upsert(ResourceRecipe {
                name: "gpu1".to_string(),
                gpu_count: 1,
                cpu_cores: "1000m".to_string(),
                memory: "4Gi".to_string(),
            })
            .await
            .unwrap();
        self.deps
            .kernel
            .endpoints
            .upsert(
                Endpoint::builder()
                    .name(name.to_string())
                    .spec_name("gpu1".to_string())
                    .max_replicas(10)
                    .concurrency(4)
                    .build(),
            )
            .await
            .unwrap()
    }

    pub async fn seed_task(&self, task_id: &str, endpoint: &str) {
        self.deps
            .kernel
            .tasks
            .create(NewTask {
                task_id: task_id.to_string(),
                endpoint: endpoint.to_string(),
                input: Some(serde_json::json!({ "seq": task_id })),
            })
            .await
            .unwrap();
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::builder()
                .uri(uri)
                .header("x-worker-token", WORKER_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("x-worker-token", WORKER_TOKEN)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}
