//! Applies scale decisions.
//!
//! Scale-ups are a deployment write plus bookkeeping. Scale-downs never
//! interrupt running work: the oldest idle worker is drained, its pod is
//! steered toward deletion with a strong-negative deletion cost, and an
//! asynchronous verifier double-checks both the worker counter and the task
//! table before the replica count is actually lowered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::Result;
use crate::domains::endpoints::{
    Endpoint, EndpointHealth, EndpointLifecycle, ScalingAction, ScalingEvent,
};
use crate::domains::workers::{Worker, WorkerStatus};
use crate::kernel::ControlKernel;

use super::decision::ScaleDecision;
use super::provider::{PodOps, DELETION_COST_PREFER_REMOVE, DELETION_COST_PROTECT};

/// Window in which repeated `scale_down_blocked` events are suppressed.
const BLOCKED_EVENT_WINDOW_SECS: i64 = 300;
/// An endpoint younger than this is never treated as orphaned.
const ORPHAN_MIN_AGE_SECS: i64 = 600;

#[derive(Clone)]
pub struct Executor {
    kernel: Arc<ControlKernel>,
    /// Resolved once; `None` disables the drain/deletion-cost paths.
    pod_ops: Option<Arc<dyn PodOps>>,
    drain_max_wait: Duration,
    drain_poll: Duration,
    shutdown: CancellationToken,
    drains: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl Executor {
    pub fn new(kernel: Arc<ControlKernel>, shutdown: CancellationToken) -> Self {
        let pod_ops = kernel.deployments.pod_ops();
        Self {
            kernel,
            pod_ops,
            drain_max_wait: Duration::from_secs(30),
            drain_poll: Duration::from_secs(2),
            shutdown,
            drains: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn with_drain_timing(mut self, max_wait: Duration, poll: Duration) -> Self {
        self.drain_max_wait = max_wait;
        self.drain_poll = poll;
        self
    }

    /// Apply a pass's decisions. Failures are per-decision: log and move on.
    pub async fn apply(&self, decisions: &[ScaleDecision]) {
        for decision in decisions {
            let result = if decision.amount > 0 {
                self.scale_up(decision).await
            } else if decision.amount < 0 {
                self.scale_down(decision).await
            } else if decision.blocked {
                self.record_blocked(decision).await
            } else {
                Ok(())
            };
            if let Err(e) = result {
                tracing::warn!(
                    endpoint = %decision.endpoint,
                    amount = decision.amount,
                    error = %e,
                    "failed to apply scale decision"
                );
            }
        }
    }

    /// Wait for all in-flight drain verifications (tests, shutdown).
    pub async fn wait_for_drains(&self) {
        let handles: Vec<JoinHandle<()>> = self.drains.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn scale_up(&self, decision: &ScaleDecision) -> Result<()> {
        let endpoint = self.kernel.endpoints.get(&decision.endpoint).await?;

        if endpoint.health == EndpointHealth::ImagePullFailed {
            self.kernel
                .events
                .append(
                    ScalingEvent::new(
                        &decision.endpoint,
                        ScalingAction::ScaleUpBlockedImageFailure,
                        endpoint.replicas_desired,
                        endpoint.replicas_desired,
                        "image pull failing, scale-up refused",
                    )
                    .with_queue(decision.queue_length)
                    .with_priority(decision.priority),
                )
                .await?;

            // First detection forces the deployment to zero; the controller
            // would otherwise keep respawning failing pods.
            if endpoint.replicas_desired > 0 {
                self.kernel
                    .deployments
                    .update_replicas(&decision.endpoint, 0)
                    .await?;
                self.kernel
                    .endpoints
                    .set_replicas_desired(&decision.endpoint, 0, true)
                    .await?;
            }
            return Ok(());
        }

        self.kernel
            .deployments
            .update_replicas(&decision.endpoint, decision.desired)
            .await?;
        self.kernel
            .endpoints
            .set_replicas_desired(&decision.endpoint, decision.desired, true)
            .await?;

        let action = if decision.preempted_from.is_empty() {
            ScalingAction::ScaleUp
        } else {
            ScalingAction::Preempted
        };
        self.kernel
            .events
            .append(
                ScalingEvent::new(
                    &decision.endpoint,
                    action,
                    decision.current,
                    decision.desired,
                    &decision.reason,
                )
                .with_queue(decision.queue_length)
                .with_priority(decision.priority)
                .with_preempted_from(decision.preempted_from.clone()),
            )
            .await?;

        tracing::info!(
            endpoint = %decision.endpoint,
            from = decision.current,
            to = decision.desired,
            "scaled up"
        );
        Ok(())
    }

    async fn scale_down(&self, decision: &ScaleDecision) -> Result<()> {
        let endpoint = self.kernel.endpoints.get(&decision.endpoint).await?;

        match self.kernel.workers.oldest_idle(&decision.endpoint).await? {
            Some(worker) => self.start_drain(decision.clone(), worker).await,
            None => self.handle_no_idle_worker(decision, &endpoint).await,
        }
    }

    /// No idle worker to remove: either the whole endpoint is an orphaned
    /// record (deployment gone) or we record a rate-limited blocked event.
    async fn handle_no_idle_worker(
        &self,
        decision: &ScaleDecision,
        endpoint: &Endpoint,
    ) -> Result<()> {
        let now = Utc::now();

        let had_workers = !self
            .kernel
            .workers
            .list_by_endpoint(&decision.endpoint)
            .await?
            .is_empty();
        let deployment_missing = self
            .kernel
            .deployments
            .get_app(&decision.endpoint)
            .await?
            .is_none();

        if self.pod_ops.is_some()
            && now - endpoint.created_at > chrono::Duration::seconds(ORPHAN_MIN_AGE_SECS)
            && had_workers
            && deployment_missing
        {
            self.kernel
                .endpoints
                .set_lifecycle(&decision.endpoint, EndpointLifecycle::Stopped)
                .await?;
            self.kernel
                .endpoints
                .set_replicas_desired(&decision.endpoint, 0, false)
                .await?;
            self.kernel
                .events
                .append(ScalingEvent::new(
                    &decision.endpoint,
                    ScalingAction::OrphanFixed,
                    endpoint.replicas_desired,
                    0,
                    "deployment missing, endpoint record stopped",
                ))
                .await?;
            tracing::warn!(endpoint = %decision.endpoint, "orphaned endpoint stopped");
            return Ok(());
        }

        if let Some(last) = self
            .kernel
            .events
            .last_event_time(&decision.endpoint, ScalingAction::ScaleDownBlocked)
            .await?
        {
            if now - last < chrono::Duration::seconds(BLOCKED_EVENT_WINDOW_SECS) {
                return Ok(());
            }
        }
        self.kernel
            .events
            .append(ScalingEvent::new(
                &decision.endpoint,
                ScalingAction::ScaleDownBlocked,
                decision.current,
                decision.current,
                "no idle worker available",
            ))
            .await?;
        Ok(())
    }

    /// Mark the chosen worker draining, steer its pod toward deletion, and
    /// hand off to the asynchronous verifier.
    async fn start_drain(&self, decision: ScaleDecision, worker: Worker) -> Result<()> {
        self.kernel.workers.mark_draining(&worker.worker_id).await?;
        if let Some(ops) = &self.pod_ops {
            ops.mark_pod_draining(&decision.endpoint, &worker.worker_id)
                .await?;
            ops.set_pod_deletion_cost(
                &decision.endpoint,
                &worker.worker_id,
                DELETION_COST_PREFER_REMOVE,
            )
            .await?;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.verify_drain(decision, worker).await;
        });
        self.drains.lock().await.push(handle);
        Ok(())
    }

    /// Poll until `drain_max_wait` elapses. Any sign of work aborts the
    /// scale-down and restores the pod; a clean window confirms it.
    async fn verify_drain(&self, decision: ScaleDecision, worker: Worker) {
        let deadline = tokio::time::Instant::now() + self.drain_max_wait;
        let worker_id = worker.worker_id.clone();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.drain_poll) => {}
            }

            let current = match self.kernel.workers.get(&worker_id).await {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(worker = %worker_id, error = %e, "drain verification read failed");
                    continue;
                }
            };

            let Some(current) = current else {
                self.abort_drain(&decision, &worker_id, "worker disappeared during drain", false)
                    .await;
                return;
            };

            // Double-check: the counter and the task table must both agree
            // the worker is idle.
            let busy_counter = current.current_jobs > 0;
            let busy_db = match self.kernel.tasks.tasks_by_worker(&worker_id).await {
                Ok(tasks) => !tasks.is_empty(),
                Err(e) => {
                    tracing::warn!(worker = %worker_id, error = %e, "drain double-check failed");
                    continue;
                }
            };
            if busy_counter || busy_db {
                self.abort_drain(&decision, &worker_id, "work appeared during drain", true)
                    .await;
                return;
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }

        self.confirm_drain(&decision, &worker_id).await;
    }

    async fn abort_drain(
        &self,
        decision: &ScaleDecision,
        worker_id: &str,
        reason: &str,
        restore_worker: bool,
    ) {
        if let Some(ops) = &self.pod_ops {
            if let Err(e) = ops
                .set_pod_deletion_cost(&decision.endpoint, worker_id, 0)
                .await
            {
                tracing::warn!(worker = %worker_id, error = %e, "failed to restore deletion cost");
            }
        }
        if restore_worker {
            if let Err(e) = self.kernel.workers.resume(worker_id).await {
                tracing::warn!(worker = %worker_id, error = %e, "failed to resume worker");
            }
        }
        if let Err(e) = self
            .kernel
            .events
            .append(ScalingEvent::new(
                &decision.endpoint,
                ScalingAction::ScaleDownAborted,
                decision.current,
                decision.current,
                reason,
            ))
            .await
        {
            tracing::warn!(endpoint = %decision.endpoint, error = %e, "failed to record abort event");
        }
        tracing::info!(
            endpoint = %decision.endpoint,
            worker = %worker_id,
            reason,
            "scale-down aborted"
        );
    }

    async fn confirm_drain(&self, decision: &ScaleDecision, worker_id: &str) {
        let result: Result<()> = async {
            self.kernel
                .deployments
                .update_replicas(&decision.endpoint, decision.desired)
                .await?;
            self.kernel
                .endpoints
                .set_replicas_desired(&decision.endpoint, decision.desired, true)
                .await?;
            self.kernel
                .events
                .append(ScalingEvent::new(
                    &decision.endpoint,
                    ScalingAction::ScaleDown,
                    decision.current,
                    decision.desired,
                    &format!("drained pod {worker_id}"),
                ))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!(
                endpoint = %decision.endpoint,
                worker = %worker_id,
                from = decision.current,
                to = decision.desired,
                "scaled down"
            ),
            Err(e) => tracing::warn!(
                endpoint = %decision.endpoint,
                error = %e,
                "failed to confirm scale-down"
            ),
        }
    }

    async fn record_blocked(&self, decision: &ScaleDecision) -> Result<()> {
        self.kernel
            .events
            .append(
                ScalingEvent::new(
                    &decision.endpoint,
                    ScalingAction::Blocked,
                    decision.current,
                    decision.current,
                    &decision.reason,
                )
                .with_queue(decision.queue_length)
                .with_priority(decision.priority),
            )
            .await?;
        Ok(())
    }

    /// Rolling update protection: make the orchestrator take idle pods
    /// first and leave busy ones alone.
    pub async fn protect_busy_pods(&self, endpoint: &str) -> Result<()> {
        let Some(ops) = &self.pod_ops else {
            return Ok(());
        };
        for worker in self.kernel.workers.list_by_endpoint(endpoint).await? {
            if worker.status == WorkerStatus::Offline {
                continue;
            }
            let cost = if worker.current_jobs > 0 {
                DELETION_COST_PROTECT
            } else {
                DELETION_COST_PREFER_REMOVE
            };
            ops.set_pod_deletion_cost(endpoint, &worker.worker_id, cost)
                .await?;
        }
        Ok(())
    }
}
