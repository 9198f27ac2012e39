//! Periodic reconcilers using tokio-cron-scheduler.
//!
//! Each sweep closes one failure mode: lost heartbeats orphan work, orphaned
//! work must return to the queue, runaway tasks must time out, terminating
//! pods must actually die, and terminal tasks must eventually be deleted.
//!
//! Every run first takes its own lease lock; when another control-plane
//! replica owns it, the cycle is a no-op. Failures inside a sweep are
//! per-item: log and continue to the next item.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

use anyhow::Result;

use crate::autoscaler::GlobalConfig;
use crate::domains::workers::Worker;
use crate::kernel::ControlKernel;

/// OFFLINE worker records are kept this long before deletion.
const OFFLINE_WORKER_GRACE_SECS: i64 = 600;

const TASK_TIMEOUT_SWEEP_EVERY: Duration = Duration::from_secs(300);
const ORPHAN_SWEEP_EVERY: Duration = Duration::from_secs(20);
const STUCK_POD_SWEEP_EVERY: Duration = Duration::from_secs(15);
const RETENTION_SWEEP_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

const RETENTION_BATCH: i64 = 500;
const RETENTION_PAUSE: Duration = Duration::from_millis(200);

/// Start all reconcilers
pub async fn start_reconcilers(
    kernel: Arc<ControlKernel>,
    config: Arc<RwLock<GlobalConfig>>,
    task_retention_days: i64,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let heartbeat_every =
        Duration::from_secs(config.read().await.heartbeat_timeout_secs.max(1) as u64);

    // Worker-heartbeat sweep
    {
        let kernel = Arc::clone(&kernel);
        let config = Arc::clone(&config);
        let job = Job::new_repeated_async(heartbeat_every, move |_id, _sched| {
            let kernel = Arc::clone(&kernel);
            let config = Arc::clone(&config);
            Box::pin(async move {
                let timeout =
                    chrono::Duration::seconds(config.read().await.heartbeat_timeout_secs.max(1));
                run_guarded(&kernel, "reconcile:worker-heartbeats", || {
                    run_heartbeat_sweep(&kernel, timeout)
                })
                .await;
            })
        })?;
        scheduler.add(job).await?;
    }

    // Task-timeout sweep
    {
        let kernel = Arc::clone(&kernel);
        let job = Job::new_repeated_async(TASK_TIMEOUT_SWEEP_EVERY, move |_id, _sched| {
            let kernel = Arc::clone(&kernel);
            Box::pin(async move {
                run_guarded(&kernel, "reconcile:task-timeouts", || {
                    run_task_timeout_sweep(&kernel)
                })
                .await;
            })
        })?;
        scheduler.add(job).await?;
    }

    // Orphaned-task sweep
    {
        let kernel = Arc::clone(&kernel);
        let job = Job::new_repeated_async(ORPHAN_SWEEP_EVERY, move |_id, _sched| {
            let kernel = Arc::clone(&kernel);
            Box::pin(async move {
                run_guarded(&kernel, "reconcile:orphaned-tasks", || {
                    run_orphan_sweep(&kernel)
                })
                .await;
            })
        })?;
        scheduler.add(job).await?;
    }

    // Stuck-terminating-pod sweep
    {
        let kernel = Arc::clone(&kernel);
        let job = Job::new_repeated_async(STUCK_POD_SWEEP_EVERY, move |_id, _sched| {
            let kernel = Arc::clone(&kernel);
            Box::pin(async move {
                run_guarded(&kernel, "reconcile:stuck-pods", || {
                    run_stuck_pod_sweep(&kernel)
                })
                .await;
            })
        })?;
        scheduler.add(job).await?;
    }

    // Retention sweep
    {
        let kernel = Arc::clone(&kernel);
        let job = Job::new_repeated_async(RETENTION_SWEEP_EVERY, move |_id, _sched| {
            let kernel = Arc::clone(&kernel);
            Box::pin(async move {
                run_guarded(&kernel, "reconcile:task-retention", || {
                    run_retention_sweep(&kernel, task_retention_days)
                })
                .await;
            })
        })?;
        scheduler.add(job).await?;
    }

    scheduler.start().await?;

    tracing::info!("reconcilers started");
    Ok(scheduler)
}

/// Run a sweep under its lease lock; losing the lock skips the cycle.
async fn run_guarded<F, Fut>(kernel: &ControlKernel, lock_name: &str, run: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let lock = kernel.locks.lease(lock_name);
    match lock.try_lock().await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(lock = lock_name, "another replica owns the lock, skipping cycle");
            return;
        }
        Err(e) => {
            tracing::debug!(lock = lock_name, error = %e, "lock unavailable, skipping cycle");
            return;
        }
    }

    if let Err(e) = run().await {
        tracing::warn!(lock = lock_name, error = %e, "sweep failed");
    }
    lock.unlock().await;
}

/// Workers that stopped heartbeating go OFFLINE and their in-progress tasks
/// return to the queue. OFFLINE records past the grace period are deleted.
pub async fn run_heartbeat_sweep(
    kernel: &ControlKernel,
    heartbeat_timeout: chrono::Duration,
) -> Result<()> {
    let now = Utc::now();

    for worker in kernel.workers.stale(now - heartbeat_timeout).await? {
        if let Err(e) = recover_worker(kernel, &worker).await {
            tracing::warn!(worker = %worker.worker_id, error = %e, "failed to recover stale worker");
        }
    }

    let deleted = kernel
        .workers
        .delete_offline_before(now - chrono::Duration::seconds(OFFLINE_WORKER_GRACE_SECS))
        .await?;
    if deleted > 0 {
        tracing::info!(deleted, "dropped offline worker records");
    }
    Ok(())
}

async fn recover_worker(kernel: &ControlKernel, worker: &Worker) -> Result<()> {
    let tasks = kernel.tasks.tasks_by_worker(&worker.worker_id).await?;
    kernel.workers.mark_offline(&worker.worker_id).await?;

    let mut requeued = 0;
    for task in &tasks {
        if kernel.tasks.requeue(&task.task_id).await? {
            requeued += 1;
        }
    }
    tracing::warn!(
        worker = %worker.worker_id,
        endpoint = %worker.endpoint,
        requeued,
        "worker heartbeat timed out, marked offline"
    );
    Ok(())
}

/// IN_PROGRESS tasks past their endpoint's timeout become TIMEOUT and the
/// owning worker's counter is released.
pub async fn run_task_timeout_sweep(kernel: &ControlKernel) -> Result<()> {
    let now = Utc::now();

    for task in kernel.tasks.in_progress().await? {
        let timeout_secs = match kernel.endpoints.get(&task.endpoint).await {
            Ok(endpoint) => endpoint.task_timeout_secs,
            Err(_) => continue,
        };
        let started = task.started_at.unwrap_or(task.created_at);
        if now - started <= chrono::Duration::seconds(timeout_secs) {
            continue;
        }

        match kernel.tasks.mark_timed_out(&task.task_id).await {
            Ok(true) => {
                if let Some(worker_id) = &task.worker_id {
                    if let Err(e) = kernel.workers.complete(worker_id, &task.task_id).await {
                        tracing::warn!(worker = %worker_id, error = %e, "failed to release timed-out task");
                    }
                }
                tracing::warn!(task = %task.task_id, endpoint = %task.endpoint, "task timed out");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(task = %task.task_id, error = %e, "failed to time out task");
            }
        }
    }
    Ok(())
}

/// IN_PROGRESS tasks whose worker no longer exists return to the queue.
pub async fn run_orphan_sweep(kernel: &ControlKernel) -> Result<()> {
    for task in kernel.tasks.in_progress().await? {
        let orphaned = match &task.worker_id {
            Some(worker_id) => kernel.workers.get(worker_id).await?.is_none(),
            None => true,
        };
        if !orphaned {
            continue;
        }
        match kernel.tasks.requeue(&task.task_id).await {
            Ok(true) => {
                tracing::warn!(task = %task.task_id, endpoint = %task.endpoint, "requeued orphaned task");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(task = %task.task_id, error = %e, "failed to requeue orphaned task");
            }
        }
    }
    Ok(())
}

/// Terminating pods with no running tasks get killed for real; pods still
/// running work are left alone.
pub async fn run_stuck_pod_sweep(kernel: &ControlKernel) -> Result<()> {
    let Some(ops) = kernel.deployments.pod_ops() else {
        return Ok(());
    };

    for endpoint in kernel.endpoints.list().await? {
        let pods = match ops.terminating_pods(&endpoint.name).await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.name, error = %e, "failed to list terminating pods");
                continue;
            }
        };

        for pod in pods {
            let running = kernel.tasks.tasks_by_worker(&pod).await?;
            if !running.is_empty() {
                continue;
            }

            let kill = [
                "sh".to_string(),
                "-c".to_string(),
                "kill -TERM 1".to_string(),
            ];
            if let Err(e) = ops.exec_pod_command(&endpoint.name, &pod, &kill).await {
                tracing::warn!(pod = %pod, error = %e, "exec kill failed, force-deleting pod");
                if let Err(e) = ops.force_delete_pod(&endpoint.name, &pod).await {
                    tracing::warn!(pod = %pod, error = %e, "force delete failed");
                    continue;
                }
            }
            tracing::info!(pod = %pod, endpoint = %endpoint.name, "killed stuck terminating pod");
        }
    }
    Ok(())
}

/// Delete terminal tasks past retention, in batches with pauses so the
/// deletes never contend with live assignment for long.
pub async fn run_retention_sweep(kernel: &ControlKernel, retention_days: i64) -> Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let mut total = 0u64;

    loop {
        let deleted = kernel
            .tasks
            .delete_terminal_before(cutoff, RETENTION_BATCH)
            .await?;
        if deleted == 0 {
            break;
        }
        total += deleted;
        tokio::time::sleep(RETENTION_PAUSE).await;
    }

    if total > 0 {
        tracing::info!(total, "retention deleted terminal tasks");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::endpoints::Endpoint;
    use crate::domains::tasks::{NewTask, TaskStatus};
    use crate::domains::workers::WorkerStatus;
    use crate::kernel::TestDependencies;

    async fn seed_assigned_task(deps: &TestDependencies, task_id: &str, worker_id: &str) {
        deps.kernel
            .workers
            .upsert_ready(worker_id, "e")
            .await
            .unwrap();
        deps.kernel
            .tasks
            .create(NewTask {
                task_id: task_id.to_string(),
                endpoint: "e".to_string(),
                input: None,
            })
            .await
            .unwrap();
        let assigned = deps
            .kernel
            .tasks
            .assign_pending("e", 1, worker_id)
            .await
            .unwrap();
        let ids: Vec<String> = assigned.iter().map(|t| t.task_id.clone()).collect();
        deps.kernel.workers.assign(worker_id, &ids).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_sweep_recovers_orphaned_work() {
        let deps = TestDependencies::new();
        seed_assigned_task(&deps, "t1", "w1").await;

        // A negative timeout makes every worker stale immediately.
        run_heartbeat_sweep(&deps.kernel, chrono::Duration::seconds(-1))
            .await
            .unwrap();

        let worker = deps.kernel.workers.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        assert_eq!(worker.current_jobs, 0);

        let task = deps.kernel.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.worker_id.is_none());
        assert!(task.executions().last().unwrap().end.is_some());

        // A fresh worker can pick the task up again.
        deps.kernel.workers.upsert_ready("w2", "e").await.unwrap();
        let reassigned = deps
            .kernel
            .tasks
            .assign_pending("e", 5, "w2")
            .await
            .unwrap();
        assert_eq!(reassigned.len(), 1);
        assert_eq!(reassigned[0].worker_id.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn heartbeat_sweep_leaves_live_workers_alone() {
        let deps = TestDependencies::new();
        seed_assigned_task(&deps, "t1", "w1").await;

        run_heartbeat_sweep(&deps.kernel, chrono::Duration::hours(1))
            .await
            .unwrap();

        let worker = deps.kernel.workers.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Busy);
        let task = deps.kernel.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn timeout_sweep_times_out_overdue_tasks() {
        let deps = TestDependencies::new();
        let endpoint = Endpoint::builder()
            .name("e".to_string())
            .spec_name("small".to_string())
            .task_timeout_secs(0i64)
            .build();
        deps.kernel.endpoints.upsert(endpoint).await.unwrap();
        seed_assigned_task(&deps, "t1", "w1").await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        run_task_timeout_sweep(&deps.kernel).await.unwrap();

        let task = deps.kernel.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        let worker = deps.kernel.workers.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_jobs, 0);
    }

    #[tokio::test]
    async fn orphan_sweep_requeues_tasks_of_missing_workers() {
        let deps = TestDependencies::new();
        seed_assigned_task(&deps, "t1", "w1").await;

        // Simulate the worker record disappearing entirely.
        deps.kernel.workers.mark_offline("w1").await.unwrap();
        deps.kernel
            .workers
            .delete_offline_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        run_orphan_sweep(&deps.kernel).await.unwrap();

        let task = deps.kernel.tasks.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.worker_id.is_none());
    }

    #[tokio::test]
    async fn stuck_pod_sweep_kills_only_idle_pods() {
        let deps = TestDependencies::new();
        let endpoint = Endpoint::builder()
            .name("e".to_string())
            .spec_name("small".to_string())
            .build();
        deps.kernel.endpoints.upsert(endpoint).await.unwrap();

        seed_assigned_task(&deps, "t1", "busy-pod").await;
        deps.kernel
            .workers
            .upsert_ready("idle-pod", "e")
            .await
            .unwrap();
        deps.provider.set_terminating(
            "e",
            vec!["busy-pod".to_string(), "idle-pod".to_string()],
        );

        run_stuck_pod_sweep(&deps.kernel).await.unwrap();

        assert!(!deps.provider.executed_commands("idle-pod").is_empty());
        assert!(deps.provider.executed_commands("busy-pod").is_empty());
    }

    #[tokio::test]
    async fn retention_sweep_deletes_old_terminal_tasks_only() {
        let deps = TestDependencies::new();
        seed_assigned_task(&deps, "t1", "w1").await;
        deps.kernel
            .tasks
            .complete(
                "t1",
                "w1",
                &crate::domains::tasks::TaskOutcome::Completed(None),
            )
            .await
            .unwrap();
        deps.kernel
            .tasks
            .create(NewTask {
                task_id: "t2".to_string(),
                endpoint: "e".to_string(),
                input: None,
            })
            .await
            .unwrap();

        // Retention of -1 days puts the cutoff in the future, so the
        // completed task is already eligible.
        run_retention_sweep(&deps.kernel, -1).await.unwrap();

        assert!(deps.kernel.tasks.get("t1").await.is_err());
        assert!(deps.kernel.tasks.get("t2").await.is_ok());
    }
}
