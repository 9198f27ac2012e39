//! Worker records and the registry.
//!
//! A worker is one running pod of an endpoint, identified by its pod name.
//! Records are created when a pod first contacts the job protocol, mutated by
//! heartbeats and assignments, moved to OFFLINE by the heartbeat sweep, and
//! deleted after a grace period.

mod model;
mod registry;

pub use model::{Worker, WorkerStatus};
pub use registry::{PostgresWorkerRegistry, WorkerRegistry};
