//! End-to-end autoscaler tests: metrics -> decisions -> executor, against
//! the in-memory dependencies and the in-process deployment provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use controlplane_core::autoscaler::{
    AppStatus, AutoscalerManager, Executor, ScaleDecision, DELETION_COST_PREFER_REMOVE,
};
use controlplane_core::domains::endpoints::{
    Endpoint, EndpointHealth, EndpointLifecycle, ResourceRecipe, ScalingAction,
};
use controlplane_core::domains::workers::WorkerStatus;
use tokio_util::sync::CancellationToken;

async fn manager_for(harness: &Harness) -> Arc<AutoscalerManager> {
    AutoscalerManager::new(Arc::clone(&harness.deps.kernel), CancellationToken::new())
        .await
        .unwrap()
}

fn fast_executor(harness: &Harness) -> Executor {
    Executor::new(Arc::clone(&harness.deps.kernel), CancellationToken::new())
        .with_drain_timing(Duration::from_millis(300), Duration::from_millis(50))
}

fn scale_down_decision(endpoint: &str, current: i32, desired: i32) -> ScaleDecision {
    ScaleDecision {
        endpoint: endpoint.to_string(),
        current,
        desired,
        amount: desired - current,
        priority: 0,
        queue_length: 0,
        approved: true,
        blocked: false,
        reason: "idle".to_string(),
        preempted_from: vec![],
    }
}

/// Three idle-capable workers; the oldest idle one is drained and the
/// deployment shrinks once the drain window stays clean.
#[tokio::test]
async fn smart_scale_down_drains_oldest_idle_worker() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    let kernel = &harness.deps.kernel;

    kernel.endpoints.set_replicas_desired("e", 3, false).await.unwrap();
    harness
        .deps
        .provider
        .set_app("e", AppStatus { desired: 3, ready: 3, available: 3 });

    // w1 is busy with two tasks.
    kernel.workers.upsert_ready("w1", "e").await.unwrap();
    for i in 1..=2 {
        harness.seed_task(&format!("busy{i}"), "e").await;
    }
    let assigned = kernel.tasks.assign_pending("e", 2, "w1").await.unwrap();
    let ids: Vec<String> = assigned.iter().map(|t| t.task_id.clone()).collect();
    kernel.workers.assign("w1", &ids).await.unwrap();

    // w2 went idle before w3, so it is the older idle worker.
    for (task, worker) in [("old", "w2"), ("recent", "w3")] {
        kernel.workers.upsert_ready(worker, "e").await.unwrap();
        harness.seed_task(task, "e").await;
        let assigned = kernel.tasks.assign_pending("e", 1, worker).await.unwrap();
        let ids: Vec<String> = assigned.iter().map(|t| t.task_id.clone()).collect();
        kernel.workers.assign(worker, &ids).await.unwrap();
        kernel
            .tasks
            .complete(
                task,
                worker,
                &controlplane_core::domains::tasks::TaskOutcome::Completed(None),
            )
            .await
            .unwrap();
        kernel.workers.complete(worker, task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let executor = fast_executor(&harness);
    executor.apply(&[scale_down_decision("e", 3, 2)]).await;

    // The drain is underway: target chosen, pod steered toward deletion.
    let drained = kernel.workers.get("w2").await.unwrap().unwrap();
    assert_eq!(drained.status, WorkerStatus::Draining);
    assert!(harness.deps.provider.is_draining("w2"));
    assert_eq!(
        harness.deps.provider.deletion_cost("w2"),
        Some(DELETION_COST_PREFER_REMOVE)
    );

    executor.wait_for_drains().await;

    let app = harness.deps.provider.get_status("e");
    assert_eq!(app.desired, 2);
    let endpoint = kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.replicas_desired, 2);

    let events = harness.deps.events.all();
    let down = events
        .iter()
        .find(|e| e.action == ScalingAction::ScaleDown)
        .expect("scale_down event");
    assert!(down.reason.contains("w2"));
}

/// Work appearing mid-drain aborts the scale-down and restores the pod.
#[tokio::test]
async fn scale_down_aborts_when_work_appears_during_drain() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    let kernel = &harness.deps.kernel;

    kernel.endpoints.set_replicas_desired("e", 3, false).await.unwrap();
    harness
        .deps
        .provider
        .set_app("e", AppStatus { desired: 3, ready: 3, available: 3 });
    kernel.workers.upsert_ready("w2", "e").await.unwrap();

    let executor = Executor::new(Arc::clone(&harness.deps.kernel), CancellationToken::new())
        .with_drain_timing(Duration::from_millis(500), Duration::from_millis(100));
    executor.apply(&[scale_down_decision("e", 3, 2)]).await;

    // Before the verifier's first poll, a task lands on w2 in the database
    // (the double-check source of truth).
    harness.seed_task("race", "e").await;
    kernel.tasks.assign_pending("e", 1, "w2").await.unwrap();

    executor.wait_for_drains().await;

    // Deployment untouched, deletion cost restored, abort recorded.
    let app = harness.deps.provider.get_status("e");
    assert_eq!(app.desired, 3);
    assert_eq!(harness.deps.provider.deletion_cost("w2"), Some(0));
    let events = harness.deps.events.all();
    assert!(events
        .iter()
        .any(|e| e.action == ScalingAction::ScaleDownAborted));
    assert!(!events.iter().any(|e| e.action == ScalingAction::ScaleDown));
}

/// No idle worker: a rate-limited blocked event, once per window.
#[tokio::test]
async fn scale_down_blocked_is_rate_limited() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    let kernel = &harness.deps.kernel;
    kernel.endpoints.set_replicas_desired("e", 2, false).await.unwrap();
    harness
        .deps
        .provider
        .set_app("e", AppStatus { desired: 2, ready: 2, available: 2 });

    // A busy worker only; nothing idle to drain.
    kernel.workers.upsert_ready("w1", "e").await.unwrap();
    harness.seed_task("t1", "e").await;
    let assigned = kernel.tasks.assign_pending("e", 1, "w1").await.unwrap();
    let ids: Vec<String> = assigned.iter().map(|t| t.task_id.clone()).collect();
    kernel.workers.assign("w1", &ids).await.unwrap();

    let executor = fast_executor(&harness);
    executor.apply(&[scale_down_decision("e", 2, 1)]).await;
    executor.apply(&[scale_down_decision("e", 2, 1)]).await;
    executor.wait_for_drains().await;

    let blocked: Vec<_> = harness
        .deps
        .events
        .all()
        .into_iter()
        .filter(|e| e.action == ScalingAction::ScaleDownBlocked)
        .collect();
    assert_eq!(blocked.len(), 1, "second event suppressed inside the window");
}

/// An old endpoint whose deployment vanished gets its record stopped.
#[tokio::test]
async fn orphaned_endpoint_is_fixed() {
    let harness = Harness::new();
    harness
        .deps
        .kernel
        .recipes
        .upsert(ResourceRecipe {
            name: "gpu1".to_string(),
            gpu_count: 1,
            cpu_cores: "1".to_string(),
            memory: "4Gi".to_string(),
        })
        .await
        .unwrap();
    harness
        .deps
        .kernel
        .endpoints
        .upsert(
            Endpoint::builder()
                .name("e".to_string())
                .spec_name("gpu1".to_string())
                .max_replicas(10)
                .created_at(chrono::Utc::now() - chrono::Duration::minutes(20))
                .build(),
        )
        .await
        .unwrap();
    let kernel = &harness.deps.kernel;
    kernel.endpoints.set_replicas_desired("e", 2, false).await.unwrap();

    // Workers existed once; the deployment is gone now.
    kernel.workers.upsert_ready("w1", "e").await.unwrap();
    kernel.workers.mark_offline("w1").await.unwrap();

    let executor = fast_executor(&harness);
    executor.apply(&[scale_down_decision("e", 2, 0)]).await;
    executor.wait_for_drains().await;

    let endpoint = kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.lifecycle, EndpointLifecycle::Stopped);
    assert_eq!(endpoint.replicas_desired, 0);
    assert!(harness
        .deps
        .events
        .all()
        .iter()
        .any(|e| e.action == ScalingAction::OrphanFixed));
}

/// A full manager pass scales a queued endpoint up and records the event.
#[tokio::test]
async fn manager_pass_scales_up_queued_endpoint() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    for i in 1..=3 {
        harness.seed_task(&format!("t{i}"), "e").await;
    }

    let manager = manager_for(&harness).await;
    manager.run_pass(None).await;

    let endpoint = harness.deps.kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.replicas_desired, 3);
    assert!(endpoint.last_scale_time.is_some());
    assert_eq!(harness.deps.provider.get_status("e").desired, 3);
    assert!(harness
        .deps
        .events
        .all()
        .iter()
        .any(|e| e.action == ScalingAction::ScaleUp && e.to_replicas == 3));

    // An immediate second pass must not double-provision (cooldown and
    // provisioned-capacity gates).
    manager.run_pass(None).await;
    let endpoint = harness.deps.kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.replicas_desired, 3);
}

/// Image-failure health refuses the scale-up and forces the deployment to
/// zero so failing pods stop respawning.
#[tokio::test]
async fn image_failure_blocks_scale_up_and_forces_zero() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    let kernel = &harness.deps.kernel;
    kernel
        .endpoints
        .set_health("e", EndpointHealth::ImagePullFailed)
        .await
        .unwrap();
    kernel.endpoints.set_replicas_desired("e", 2, false).await.unwrap();
    harness
        .deps
        .provider
        .set_app("e", AppStatus { desired: 2, ready: 0, available: 0 });
    for i in 1..=4 {
        harness.seed_task(&format!("t{i}"), "e").await;
    }

    let manager = manager_for(&harness).await;
    manager.run_pass(None).await;

    assert_eq!(harness.deps.provider.get_status("e").desired, 0);
    let endpoint = kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.replicas_desired, 0);
    assert!(harness
        .deps
        .events
        .all()
        .iter()
        .any(|e| e.action == ScalingAction::ScaleUpBlockedImageFailure));
}

/// The global switch stops scaling unless an endpoint overrides it on.
#[tokio::test]
async fn global_disable_stops_scaling() {
    let harness = Harness::new();
    harness.seed_endpoint("e").await;
    for i in 1..=3 {
        harness.seed_task(&format!("t{i}"), "e").await;
    }

    let manager = manager_for(&harness).await;
    manager
        .update_config(|config| config.enabled = false)
        .await
        .unwrap();
    manager.run_pass(None).await;

    let endpoint = harness.deps.kernel.endpoints.get("e").await.unwrap();
    assert_eq!(endpoint.replicas_desired, 0);
    assert!(harness.deps.events.all().is_empty());
}

/// Targeted passes evaluate one endpoint while budgeting over all.
#[tokio::test]
async fn targeted_pass_touches_only_named_endpoint() {
    let harness = Harness::new();
    harness.seed_endpoint("a").await;
    harness
        .deps
        .kernel
        .endpoints
        .upsert(
            Endpoint::builder()
                .name("b".to_string())
                .spec_name("gpu1".to_string())
                .max_replicas(10)
                .build(),
        )
        .await
        .unwrap();
    for i in 1..=2 {
        harness.seed_task(&format!("a{i}"), "a").await;
        harness.seed_task(&format!("b{i}"), "b").await;
    }

    let manager = manager_for(&harness).await;
    manager.run_pass(Some("a")).await;

    assert_eq!(harness.deps.kernel.endpoints.get("a").await.unwrap().replicas_desired, 2);
    assert_eq!(harness.deps.kernel.endpoints.get("b").await.unwrap().replicas_desired, 0);
}

/// The persisted global config survives a manager restart.
#[tokio::test]
async fn manager_reloads_persisted_config() {
    let harness = Harness::new();
    let manager = manager_for(&harness).await;
    manager
        .update_config(|config| {
            config.max_gpu_count = 4.0;
            config.starvation_time_secs = 33;
        })
        .await
        .unwrap();

    let reloaded = manager_for(&harness).await;
    let config = reloaded.config();
    let config = config.read().await;
    assert_eq!(config.max_gpu_count, 4.0);
    assert_eq!(config.starvation_time_secs, 33);
}
