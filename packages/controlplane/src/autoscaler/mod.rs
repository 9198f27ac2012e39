//! Autoscaler: metrics -> decisions -> execution, owned by a single control
//! loop per §manager. The deployment controller is reached only through the
//! provider contract.

pub mod decision;
pub mod executor;
pub mod manager;
pub mod metrics;
pub mod provider;
pub mod resources;

pub use decision::{DecisionEngine, DecisionInput, ScaleDecision};
pub use executor::Executor;
pub use manager::{AutoscalerManager, GlobalConfig};
pub use metrics::{EndpointMetrics, MetricsCollector};
pub use provider::{
    AppStatus, DeploymentProvider, MemoryProvider, PodOps, ReplicaEvent,
    DELETION_COST_PREFER_REMOVE, DELETION_COST_PROTECT,
};
pub use resources::{Capacity, ClusterResources, Resources};
