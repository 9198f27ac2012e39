//! The autoscaler control loop.
//!
//! One manager per process. A fixed-interval tick runs a full pass over all
//! endpoints; replica-change events enqueue targeted re-evaluations through
//! a deduplicated bounded channel. Every pass first takes the global lease
//! lock, so across control-plane replicas exactly one evaluates at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::common::Result;
use crate::kernel::kv::KvStore;
use crate::kernel::ControlKernel;

use super::decision::{DecisionEngine, DecisionInput};
use super::executor::Executor;
use super::metrics::MetricsCollector;
use super::resources::{recipe_resources, Capacity, ClusterResources, Resources};

const GLOBAL_CONFIG_KEY: &str = "autoscaler:global-config";
const GLOBAL_LOCK_KEY: &str = "autoscaler:global-lock";
const TRIGGER_CHANNEL_CAPACITY: usize = 256;

/// Cluster-wide autoscaler settings, persisted as JSON in the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Budget dimensions; `<= 0` means unlimited.
    pub max_gpu_count: f64,
    pub max_cpu_cores: f64,
    pub max_memory_gb: f64,
    pub starvation_time_secs: i64,
    pub heartbeat_timeout_secs: i64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            max_gpu_count: 0.0,
            max_cpu_cores: 0.0,
            max_memory_gb: 0.0,
            starvation_time_secs: 120,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl GlobalConfig {
    pub async fn load(kv: &dyn KvStore) -> Result<Self> {
        match kv.get(GLOBAL_CONFIG_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(config) => Ok(config),
                Err(e) => {
                    tracing::warn!(error = %e, "stored autoscaler config unreadable, using defaults");
                    Ok(Self::default())
                }
            },
            None => Ok(Self::default()),
        }
    }

    pub async fn persist(&self, kv: &dyn KvStore) -> Result<()> {
        kv.put(GLOBAL_CONFIG_KEY, &serde_json::to_string(self)?).await
    }

    pub fn capacity(&self) -> Capacity {
        Capacity::from_limits(self.max_gpu_count, self.max_cpu_cores, self.max_memory_gb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Created,
    Running,
    Stopped,
}

pub struct AutoscalerManager {
    kernel: Arc<ControlKernel>,
    collector: Arc<MetricsCollector>,
    executor: Executor,
    config: Arc<RwLock<GlobalConfig>>,
    trigger_tx: mpsc::Sender<String>,
    trigger_rx: StdMutex<Option<mpsc::Receiver<String>>>,
    pending_triggers: Arc<StdMutex<HashSet<String>>>,
    /// Trigger-channel overflow degrades to a full pass, never to a miss.
    overflow: Arc<AtomicBool>,
    shutdown: CancellationToken,
    state: StdMutex<ManagerState>,
}

impl AutoscalerManager {
    /// Load the persisted global config and build the manager.
    pub async fn new(kernel: Arc<ControlKernel>, shutdown: CancellationToken) -> Result<Arc<Self>> {
        let executor = Executor::new(Arc::clone(&kernel), shutdown.clone());
        Self::with_executor(kernel, shutdown, executor).await
    }

    /// Build with a pre-configured executor (custom drain timing).
    pub async fn with_executor(
        kernel: Arc<ControlKernel>,
        shutdown: CancellationToken,
        executor: Executor,
    ) -> Result<Arc<Self>> {
        let config = GlobalConfig::load(&*kernel.kv).await?;
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let collector = Arc::new(MetricsCollector::new(Arc::clone(&kernel)));

        Ok(Arc::new(Self {
            kernel,
            collector,
            executor,
            config: Arc::new(RwLock::new(config)),
            trigger_tx,
            trigger_rx: StdMutex::new(Some(trigger_rx)),
            pending_triggers: Arc::new(StdMutex::new(HashSet::new())),
            overflow: Arc::new(AtomicBool::new(false)),
            shutdown,
            state: StdMutex::new(ManagerState::Created),
        }))
    }

    pub fn config(&self) -> Arc<RwLock<GlobalConfig>> {
        Arc::clone(&self.config)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Mutate the global config: persist first, then swap the in-memory
    /// copy under a short exclusive section.
    pub async fn update_config<F>(&self, mutate: F) -> Result<GlobalConfig>
    where
        F: FnOnce(&mut GlobalConfig),
    {
        let mut next = self.config.read().await.clone();
        mutate(&mut next);
        next.persist(&*self.kernel.kv).await?;
        *self.config.write().await = next.clone();
        Ok(next)
    }

    /// Enqueue a targeted re-evaluation for one endpoint. Duplicate names
    /// coalesce; overflow falls back to a full pass.
    pub fn trigger(&self, endpoint: &str) {
        let mut pending = self.pending_triggers.lock().unwrap();
        if pending.contains(endpoint) {
            return;
        }
        match self.trigger_tx.try_send(endpoint.to_string()) {
            Ok(()) => {
                pending.insert(endpoint.to_string());
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow.store(true, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Run until the shutdown token fires. Consumes the trigger receiver.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        *self.state.lock().unwrap() = ManagerState::Running;

        // Replica watch feeds the live metrics cache and targeted triggers.
        let mut watch = self.kernel.deployments.watch_replicas().await?;
        let watcher = Arc::clone(&self);
        let watch_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watch_shutdown.cancelled() => break,
                    event = watch.recv() => {
                        let Some(event) = event else { break };
                        watcher.collector.observe(&event);
                        if event.spec_changed {
                            if let Err(e) = watcher.executor.protect_busy_pods(&event.endpoint).await {
                                tracing::warn!(endpoint = %event.endpoint, error = %e, "busy-pod protection failed");
                            }
                        }
                        watcher.trigger(&event.endpoint);
                    }
                }
            }
        });

        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .unwrap()
            .take()
            .expect("manager can only run once");

        let interval_secs = self.config.read().await.interval_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval_secs, "autoscaler control loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pass(None).await;
                }
                name = trigger_rx.recv() => {
                    let Some(name) = name else { break };
                    self.pending_triggers.lock().unwrap().remove(&name);
                    if self.overflow.swap(false, Ordering::SeqCst) {
                        self.run_pass(None).await;
                    } else {
                        self.run_pass(Some(&name)).await;
                    }
                }
            }
        }

        *self.state.lock().unwrap() = ManagerState::Stopped;
        tracing::info!("autoscaler control loop stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == ManagerState::Running
    }

    /// One pass: take the global lock, evaluate, apply. Losing the lock
    /// makes the cycle a no-op.
    pub async fn run_pass(&self, scope: Option<&str>) {
        let lock = self.kernel.locks.lease(GLOBAL_LOCK_KEY);
        match lock.try_lock().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("another replica holds the autoscaler lock, skipping pass");
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "autoscaler lock unavailable, skipping pass");
                return;
            }
        }

        if let Err(e) = self.evaluate(scope).await {
            tracing::warn!(error = %e, "autoscaler pass failed");
        }
        lock.unlock().await;
    }

    /// Collect metrics for every endpoint (cluster totals always span all of
    /// them), plan, and execute.
    async fn evaluate(&self, scope: Option<&str>) -> Result<()> {
        let config = self.config.read().await.clone();
        let now = Utc::now();

        let endpoints = self.kernel.endpoints.list().await?;
        let mut inputs = Vec::with_capacity(endpoints.len());
        let mut used = Resources::default();

        for endpoint in endpoints {
            let metrics = match self.collector.collect(&endpoint, now).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %e, "metrics collection failed, skipping endpoint");
                    continue;
                }
            };
            let per_replica = match self.kernel.recipes.get(&endpoint.spec_name).await {
                Ok(recipe) => match recipe_resources(&recipe) {
                    Ok(resources) => resources,
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint.name, error = %e, "unparseable spec, skipping endpoint");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %e, "missing spec, skipping endpoint");
                    continue;
                }
            };

            used.add(&per_replica.scaled(metrics.replicas_ready));
            inputs.push(DecisionInput {
                endpoint,
                metrics,
                per_replica,
            });
        }

        let cluster = ClusterResources::new(config.capacity(), used);
        let engine = DecisionEngine {
            global_enabled: config.enabled,
            starvation_time: chrono::Duration::seconds(config.starvation_time_secs),
        };
        let decisions = engine.plan(&inputs, cluster, scope, now);

        if !decisions.is_empty() {
            tracing::debug!(count = decisions.len(), "applying scale decisions");
        }
        self.executor.apply(&decisions).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kv::MemoryKv;

    #[tokio::test]
    async fn config_round_trips_through_kv() {
        let kv = MemoryKv::new();
        let mut config = GlobalConfig::default();
        config.max_gpu_count = 8.0;
        config.enabled = false;
        config.persist(&kv).await.unwrap();

        let loaded = GlobalConfig::load(&kv).await.unwrap();
        assert_eq!(loaded.max_gpu_count, 8.0);
        assert!(!loaded.enabled);
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let kv = MemoryKv::new();
        let loaded = GlobalConfig::load(&kv).await.unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.heartbeat_timeout_secs, 60);
    }

    #[tokio::test]
    async fn unreadable_config_falls_back_to_defaults() {
        let kv = MemoryKv::new();
        kv.put(GLOBAL_CONFIG_KEY, "not json").await.unwrap();
        let loaded = GlobalConfig::load(&kv).await.unwrap();
        assert!(loaded.enabled);
    }
}
