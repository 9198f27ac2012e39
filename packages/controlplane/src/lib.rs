// Serverless container control plane.
//
// Clients submit per-endpoint tasks; worker pods pull them over HTTP; the
// autoscaler continuously adjusts per-endpoint replica counts under a shared
// cluster budget. Periodic reconcilers close the failure modes (lost
// heartbeats, task timeouts, orphaned assignments, stuck pods).

pub mod autoscaler;
pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod reconcile;
pub mod server;

pub use config::*;
