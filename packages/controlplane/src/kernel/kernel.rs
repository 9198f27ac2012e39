// ControlKernel - core infrastructure with all dependencies
//
// The ControlKernel holds the stores, the KV store, the deployment provider,
// and the lock manager, and provides access via traits for testability.

use std::sync::Arc;

use sqlx::PgPool;

use crate::autoscaler::provider::DeploymentProvider;
use crate::domains::endpoints::{
    EndpointStore, PostgresEndpointStore, PostgresRecipeStore, PostgresScalingEventStore,
    RecipeStore, ScalingEventStore,
};
use crate::domains::tasks::{PostgresTaskStore, TaskStore};
use crate::domains::workers::{PostgresWorkerRegistry, WorkerRegistry};

use super::kv::KvStore;
use super::lock::LockManager;

/// ControlKernel holds all control-plane dependencies
pub struct ControlKernel {
    pub tasks: Arc<dyn TaskStore>,
    pub workers: Arc<dyn WorkerRegistry>,
    pub endpoints: Arc<dyn EndpointStore>,
    pub recipes: Arc<dyn RecipeStore>,
    pub events: Arc<dyn ScalingEventStore>,
    pub kv: Arc<dyn KvStore>,
    pub deployments: Arc<dyn DeploymentProvider>,
    pub locks: LockManager,
}

impl ControlKernel {
    /// Creates a new ControlKernel with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        workers: Arc<dyn WorkerRegistry>,
        endpoints: Arc<dyn EndpointStore>,
        recipes: Arc<dyn RecipeStore>,
        events: Arc<dyn ScalingEventStore>,
        kv: Arc<dyn KvStore>,
        deployments: Arc<dyn DeploymentProvider>,
    ) -> Self {
        let locks = LockManager::new(Arc::clone(&kv));
        Self {
            tasks,
            workers,
            endpoints,
            recipes,
            events,
            kv,
            deployments,
            locks,
        }
    }

    /// Production wiring: Postgres-backed stores over one pool.
    pub fn postgres(
        pool: PgPool,
        kv: Arc<dyn KvStore>,
        deployments: Arc<dyn DeploymentProvider>,
    ) -> Self {
        Self::new(
            Arc::new(PostgresTaskStore::new(pool.clone())),
            Arc::new(PostgresWorkerRegistry::new(pool.clone())),
            Arc::new(PostgresEndpointStore::new(pool.clone())),
            Arc::new(PostgresRecipeStore::new(pool.clone())),
            Arc::new(PostgresScalingEventStore::new(pool)),
            kv,
            deployments,
        )
    }
}
