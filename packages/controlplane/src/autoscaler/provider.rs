//! Deployment-controller contract.
//!
//! The control plane asks a provider for replica counts and per-pod
//! operations; it never talks to the orchestrator directly. Per-pod
//! operations are an optional capability: a provider that cannot expose them
//! returns `None` from `pod_ops` and the executor disables the paths that
//! need them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;

/// Deletion-cost sentinel steering the orchestrator toward a drained pod.
pub const DELETION_COST_PREFER_REMOVE: i32 = -1000;
/// Deletion-cost sentinel protecting a busy pod during rolling updates.
pub const DELETION_COST_PROTECT: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStatus {
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
}

/// Replica-change notification from the deployment controller.
#[derive(Debug, Clone)]
pub struct ReplicaEvent {
    pub endpoint: String,
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
    /// The deployment spec itself changed (rolling update), not just the
    /// replica counts.
    pub spec_changed: bool,
}

#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    /// Set the deployment's replica count.
    async fn update_replicas(&self, endpoint: &str, replicas: i32) -> Result<()>;

    /// Deployment snapshot; `None` when the deployment does not exist.
    async fn get_app(&self, endpoint: &str) -> Result<Option<AppStatus>>;

    /// Stream of replica-change events.
    async fn watch_replicas(&self) -> Result<mpsc::Receiver<ReplicaEvent>>;

    /// Optional per-pod capability, resolved once by consumers.
    fn pod_ops(&self) -> Option<Arc<dyn PodOps>> {
        None
    }
}

#[async_trait]
pub trait PodOps: Send + Sync {
    async fn mark_pod_draining(&self, endpoint: &str, pod: &str) -> Result<()>;

    async fn set_pod_deletion_cost(&self, endpoint: &str, pod: &str, cost: i32) -> Result<()>;

    async fn force_delete_pod(&self, endpoint: &str, pod: &str) -> Result<()>;

    /// Run a command inside the pod's container (used to signal PID 1).
    async fn exec_pod_command(&self, endpoint: &str, pod: &str, command: &[String])
        -> Result<String>;

    /// Pods with a deletion timestamp that have not gone away.
    async fn terminating_pods(&self, endpoint: &str) -> Result<Vec<String>>;
}

// ============================================================================
// In-process provider
// ============================================================================

#[derive(Default)]
struct MemoryProviderState {
    apps: HashMap<String, AppStatus>,
    deletion_costs: HashMap<String, i32>,
    draining: HashSet<String>,
    force_deleted: Vec<String>,
    exec_log: Vec<(String, Vec<String>)>,
    terminating: HashMap<String, Vec<String>>,
    watchers: Vec<mpsc::Sender<ReplicaEvent>>,
}

/// Provider used when no orchestrator integration is configured (standalone
/// mode) and by the test suites. Tracks everything in process and emits a
/// replica event on every update.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<MemoryProviderState>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a deployment snapshot (ready/available included).
    pub fn set_app(&self, endpoint: &str, status: AppStatus) {
        self.state
            .lock()
            .unwrap()
            .apps
            .insert(endpoint.to_string(), status);
    }

    pub fn remove_app(&self, endpoint: &str) {
        self.state.lock().unwrap().apps.remove(endpoint);
    }

    /// Current snapshot without going through the trait (test assertions).
    pub fn get_status(&self, endpoint: &str) -> AppStatus {
        self.state
            .lock()
            .unwrap()
            .apps
            .get(endpoint)
            .copied()
            .unwrap_or(AppStatus {
                desired: 0,
                ready: 0,
                available: 0,
            })
    }

    pub fn deletion_cost(&self, pod: &str) -> Option<i32> {
        self.state.lock().unwrap().deletion_costs.get(pod).copied()
    }

    pub fn is_draining(&self, pod: &str) -> bool {
        self.state.lock().unwrap().draining.contains(pod)
    }

    pub fn was_force_deleted(&self, pod: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .force_deleted
            .iter()
            .any(|p| p == pod)
    }

    pub fn executed_commands(&self, pod: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .exec_log
            .iter()
            .filter(|(p, _)| p == pod)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Simulate a rolling update touching the deployment spec.
    pub fn emit_spec_change(&self, endpoint: &str) {
        let status = self
            .state
            .lock()
            .unwrap()
            .apps
            .get(endpoint)
            .copied()
            .unwrap_or(AppStatus {
                desired: 0,
                ready: 0,
                available: 0,
            });
        self.emit(ReplicaEvent {
            endpoint: endpoint.to_string(),
            desired: status.desired,
            ready: status.ready,
            available: status.available,
            spec_changed: true,
        });
    }

    pub fn set_terminating(&self, endpoint: &str, pods: Vec<String>) {
        self.state
            .lock()
            .unwrap()
            .terminating
            .insert(endpoint.to_string(), pods);
    }

    fn emit(&self, event: ReplicaEvent) {
        let mut state = self.state.lock().unwrap();
        state.watchers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl DeploymentProvider for MemoryProvider {
    async fn update_replicas(&self, endpoint: &str, replicas: i32) -> Result<()> {
        let status = {
            let mut state = self.state.lock().unwrap();
            let status = state
                .apps
                .entry(endpoint.to_string())
                .or_insert(AppStatus {
                    desired: 0,
                    ready: 0,
                    available: 0,
                });
            status.desired = replicas;
            *status
        };
        self.emit(ReplicaEvent {
            endpoint: endpoint.to_string(),
            desired: status.desired,
            ready: status.ready,
            available: status.available,
            spec_changed: false,
        });
        Ok(())
    }

    async fn get_app(&self, endpoint: &str) -> Result<Option<AppStatus>> {
        Ok(self.state.lock().unwrap().apps.get(endpoint).copied())
    }

    async fn watch_replicas(&self) -> Result<mpsc::Receiver<ReplicaEvent>> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().unwrap().watchers.push(tx);
        Ok(rx)
    }

    fn pod_ops(&self) -> Option<Arc<dyn PodOps>> {
        Some(Arc::new(self.clone()))
    }
}

#[async_trait]
impl PodOps for MemoryProvider {
    async fn mark_pod_draining(&self, _endpoint: &str, pod: &str) -> Result<()> {
        self.state.lock().unwrap().draining.insert(pod.to_string());
        Ok(())
    }

    async fn set_pod_deletion_cost(&self, _endpoint: &str, pod: &str, cost: i32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .deletion_costs
            .insert(pod.to_string(), cost);
        Ok(())
    }

    async fn force_delete_pod(&self, endpoint: &str, pod: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.force_deleted.push(pod.to_string());
        if let Some(pods) = state.terminating.get_mut(endpoint) {
            pods.retain(|p| p != pod);
        }
        Ok(())
    }

    async fn exec_pod_command(
        &self,
        _endpoint: &str,
        pod: &str,
        command: &[String],
    ) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .exec_log
            .push((pod.to_string(), command.to_vec()));
        Ok(String::new())
    }

    async fn terminating_pods(&self, endpoint: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .terminating
            .get(endpoint)
            .cloned()
            .unwrap_or_default())
    }
}
