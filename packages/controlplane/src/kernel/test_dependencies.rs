//! In-memory implementations of every store trait, plus a bundle that wires
//! them into a [`ControlKernel`] for tests and standalone runs.
//!
//! Each store serializes its state behind a single mutex, which gives the
//! same atomicity the Postgres implementations get from row locks: a claim
//! observes and mutates state in one critical section.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::autoscaler::provider::MemoryProvider;
use crate::common::{Error, Result};
use crate::domains::endpoints::{
    Endpoint, EndpointHealth, EndpointLifecycle, EndpointStore, RecipeStore, ResourceRecipe,
    ScalingAction, ScalingEvent, ScalingEventStore,
};
use crate::domains::tasks::{ExecutionRecord, NewTask, Task, TaskOutcome, TaskStatus, TaskStore};
use crate::domains::workers::{Worker, WorkerRegistry, WorkerStatus};

use super::kernel::ControlKernel;
use super::kv::MemoryKv;

// ============================================================================
// Tasks
// ============================================================================

#[derive(Default)]
struct TaskState {
    next_id: i64,
    tasks: BTreeMap<i64, Task>,
    ids: HashMap<String, i64>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<TaskState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let mut state = self.state.lock().unwrap();
        if state.ids.contains_key(&task.task_id) {
            return Err(Error::Conflict(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        let row = Task {
            id,
            task_id: task.task_id.clone(),
            endpoint: task.endpoint,
            status: TaskStatus::Pending,
            worker_id: None,
            input: task.input,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            execution_history: Json(vec![]),
            created_at: now,
            updated_at: now,
        };
        state.ids.insert(task.task_id, id);
        state.tasks.insert(id, row.clone());
        Ok(row)
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        let state = self.state.lock().unwrap();
        state
            .ids
            .get(task_id)
            .and_then(|id| state.tasks.get(id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    async fn update_status(&self, task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.ids.get(task_id).copied() else {
            return Ok(false);
        };
        let task = state.tasks.get_mut(&id).expect("indexed task");
        if task.status != from {
            return Ok(false);
        }
        task.status = to;
        if to.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn assign_pending(
        &self,
        endpoint: &str,
        limit: i64,
        worker_id: &str,
    ) -> Result<Vec<Task>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let ids: Vec<i64> = state
            .tasks
            .values()
            .filter(|t| t.endpoint == endpoint && t.status == TaskStatus::Pending)
            .take(limit.max(0) as usize)
            .map(|t| t.id)
            .collect();

        let mut assigned = Vec::with_capacity(ids.len());
        for id in ids {
            let task = state.tasks.get_mut(&id).expect("selected task");
            task.status = TaskStatus::InProgress;
            task.worker_id = Some(worker_id.to_string());
            task.started_at.get_or_insert(now);
            task.execution_history
                .0
                .push(ExecutionRecord::open(worker_id, now));
            task.updated_at = now;
            assigned.push(task.clone());
        }
        Ok(assigned)
    }

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<Task> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.ids.get(task_id).copied() else {
            return Err(Error::NotFound(format!("task {task_id}")));
        };
        let task = state.tasks.get_mut(&id).expect("indexed task");
        if task.status != TaskStatus::InProgress || task.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::Conflict(format!(
                "task {task_id} is not in progress with worker {worker_id}"
            )));
        }
        let now = Utc::now();
        task.status = outcome.status();
        task.completed_at = Some(now);
        match outcome {
            TaskOutcome::Completed(output) => task.output = output.clone(),
            TaskOutcome::Failed(error) => task.error = error.clone(),
        }
        if let Some(open) = task.execution_history.0.last_mut() {
            open.close(now);
        }
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn store_partial_output(
        &self,
        task_id: &str,
        worker_id: &str,
        output: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.ids.get(task_id).copied() else {
            return Err(Error::Conflict(format!(
                "task {task_id} is not in progress with worker {worker_id}"
            )));
        };
        let task = state.tasks.get_mut(&id).expect("indexed task");
        if task.status != TaskStatus::InProgress || task.worker_id.as_deref() != Some(worker_id) {
            return Err(Error::Conflict(format!(
                "task {task_id} is not in progress with worker {worker_id}"
            )));
        }
        task.output = Some(output);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn tasks_by_worker(&self, worker_id: &str) -> Result<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::InProgress && t.worker_id.as_deref() == Some(worker_id)
            })
            .cloned()
            .collect())
    }

    async fn in_progress(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn count(&self, endpoint: &str, status: TaskStatus) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.endpoint == endpoint && t.status == status)
            .count() as i64)
    }

    async fn list(&self, endpoint: &str, task_id: Option<&str>, limit: i64) -> Result<Vec<Task>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .rev()
            .filter(|t| t.endpoint == endpoint && task_id.map_or(true, |id| t.task_id == id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn requeue(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.ids.get(task_id).copied() else {
            return Ok(false);
        };
        let task = state.tasks.get_mut(&id).expect("indexed task");
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }
        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.worker_id = None;
        if let Some(open) = task.execution_history.0.last_mut() {
            if open.end.is_none() {
                open.close(now);
            }
        }
        task.updated_at = now;
        Ok(true)
    }

    async fn mark_timed_out(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.ids.get(task_id).copied() else {
            return Ok(false);
        };
        let task = state.tasks.get_mut(&id).expect("indexed task");
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }
        let now = Utc::now();
        task.status = TaskStatus::Timeout;
        task.completed_at = Some(now);
        if let Some(open) = task.execution_history.0.last_mut() {
            if open.end.is_none() {
                open.close(now);
            }
        }
        task.updated_at = now;
        Ok(true)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<i64> = state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.completed_at.is_some_and(|at| at < cutoff))
            .take(limit.max(0) as usize)
            .map(|t| t.id)
            .collect();
        for id in &doomed {
            if let Some(task) = state.tasks.remove(id) {
                state.ids.remove(&task.task_id);
            }
        }
        Ok(doomed.len() as u64)
    }
}

// ============================================================================
// Workers
// ============================================================================

#[derive(Default)]
pub struct InMemoryWorkerRegistry {
    workers: Mutex<HashMap<String, Worker>>,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn upsert_ready(&self, worker_id: &str, endpoint: &str) -> Result<Worker> {
        let mut workers = self.workers.lock().unwrap();
        let now = Utc::now();
        let worker = workers
            .entry(worker_id.to_string())
            .and_modify(|w| {
                w.last_heartbeat = now;
                if w.status == WorkerStatus::Offline {
                    w.status = WorkerStatus::Online;
                }
                w.updated_at = now;
            })
            .or_insert_with(|| Worker {
                worker_id: worker_id.to_string(),
                endpoint: endpoint.to_string(),
                status: WorkerStatus::Online,
                current_jobs: 0,
                jobs_in_progress: Json(vec![]),
                last_heartbeat: now,
                last_task_time: None,
                pod_ready_at: now,
                created_at: now,
                updated_at: now,
            });
        Ok(worker.clone())
    }

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>> {
        Ok(self.workers.lock().unwrap().get(worker_id).cloned())
    }

    async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        if let Some(w) = self.workers.lock().unwrap().get_mut(worker_id) {
            w.last_heartbeat = Utc::now();
            w.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn assign(&self, worker_id: &str, task_ids: &[String]) -> Result<()> {
        let mut workers = self.workers.lock().unwrap();
        let Some(w) = workers.get_mut(worker_id) else {
            return Err(Error::NotFound(format!("worker {worker_id}")));
        };
        if !w.accepts_work() {
            return Err(Error::Conflict(format!(
                "worker {worker_id} is draining or offline"
            )));
        }
        w.current_jobs += task_ids.len() as i32;
        w.jobs_in_progress.0.extend(task_ids.iter().cloned());
        w.status = WorkerStatus::Busy;
        w.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, worker_id: &str, task_id: &str) -> Result<()> {
        let mut workers = self.workers.lock().unwrap();
        if let Some(w) = workers.get_mut(worker_id) {
            w.current_jobs = (w.current_jobs - 1).max(0);
            w.jobs_in_progress.0.retain(|id| id != task_id);
            if w.current_jobs == 0 && w.status == WorkerStatus::Busy {
                w.status = WorkerStatus::Online;
            }
            w.last_task_time = Some(Utc::now());
            w.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_draining(&self, worker_id: &str) -> Result<()> {
        if let Some(w) = self.workers.lock().unwrap().get_mut(worker_id) {
            w.status = WorkerStatus::Draining;
            w.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn resume(&self, worker_id: &str) -> Result<()> {
        if let Some(w) = self.workers.lock().unwrap().get_mut(worker_id) {
            if w.status == WorkerStatus::Draining {
                w.status = if w.current_jobs > 0 {
                    WorkerStatus::Busy
                } else {
                    WorkerStatus::Online
                };
                w.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> Result<()> {
        if let Some(w) = self.workers.lock().unwrap().get_mut(worker_id) {
            w.status = WorkerStatus::Offline;
            w.current_jobs = 0;
            w.jobs_in_progress.0.clear();
            w.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_by_endpoint(&self, endpoint: &str) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.endpoint == endpoint)
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workers)
    }

    async fn oldest_idle(&self, endpoint: &str) -> Result<Option<Worker>> {
        // Option ordering puts never-used (None) first, i.e. oldest.
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| {
                w.endpoint == endpoint && w.current_jobs == 0 && w.status == WorkerStatus::Online
            })
            .min_by_key(|w| w.last_task_time)
            .cloned())
    }

    async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>> {
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.last_heartbeat < cutoff && w.status != WorkerStatus::Offline)
            .cloned()
            .collect())
    }

    async fn delete_offline_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut workers = self.workers.lock().unwrap();
        let before = workers.len();
        workers.retain(|_, w| !(w.status == WorkerStatus::Offline && w.updated_at < cutoff));
        Ok((before - workers.len()) as u64)
    }
}

// ============================================================================
// Endpoints, recipes, scaling events
// ============================================================================

#[derive(Default)]
pub struct InMemoryEndpointStore {
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn upsert(&self, mut endpoint: Endpoint) -> Result<Endpoint> {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints.get(&endpoint.name) {
            // Bookkeeping fields survive a config update.
            endpoint.replicas_desired = existing.replicas_desired;
            endpoint.first_pending_time = existing.first_pending_time;
            endpoint.last_scale_time = existing.last_scale_time;
            endpoint.last_task_time = existing.last_task_time;
            endpoint.created_at = existing.created_at;
        }
        endpoint.updated_at = Utc::now();
        endpoints.insert(endpoint.name.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn get(&self, name: &str) -> Result<Endpoint> {
        self.endpoints
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("endpoint {name}")))
    }

    async fn list(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> =
            self.endpoints.lock().unwrap().values().cloned().collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(endpoints)
    }

    async fn set_replicas_desired(
        &self,
        name: &str,
        replicas: i32,
        stamp_scale_time: bool,
    ) -> Result<()> {
        if let Some(ep) = self.endpoints.lock().unwrap().get_mut(name) {
            ep.replicas_desired = replicas;
            if stamp_scale_time {
                ep.last_scale_time = Some(Utc::now());
            }
            ep.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_first_pending(&self, name: &str, ts: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(ep) = self.endpoints.lock().unwrap().get_mut(name) {
            ep.first_pending_time = ts;
            ep.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_task(&self, name: &str) -> Result<()> {
        if let Some(ep) = self.endpoints.lock().unwrap().get_mut(name) {
            ep.last_task_time = Some(Utc::now());
            ep.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_health(&self, name: &str, health: EndpointHealth) -> Result<()> {
        if let Some(ep) = self.endpoints.lock().unwrap().get_mut(name) {
            ep.health = health;
            ep.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_lifecycle(&self, name: &str, lifecycle: EndpointLifecycle) -> Result<()> {
        if let Some(ep) = self.endpoints.lock().unwrap().get_mut(name) {
            ep.lifecycle = lifecycle;
            ep.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecipeStore {
    recipes: Mutex<HashMap<String, ResourceRecipe>>,
}

impl InMemoryRecipeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipeStore for InMemoryRecipeStore {
    async fn get(&self, name: &str) -> Result<ResourceRecipe> {
        self.recipes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("spec {name}")))
    }

    async fn upsert(&self, recipe: ResourceRecipe) -> Result<()> {
        self.recipes
            .lock()
            .unwrap()
            .insert(recipe.name.clone(), recipe);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScalingEventStore {
    events: Mutex<Vec<ScalingEvent>>,
}

impl InMemoryScalingEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn all(&self) -> Vec<ScalingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScalingEventStore for InMemoryScalingEventStore {
    async fn append(&self, event: ScalingEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn last_event_time(
        &self,
        endpoint: &str,
        action: ScalingAction,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.endpoint == endpoint && e.action == action)
            .map(|e| e.ts)
            .max())
    }

    async fn recent(&self, endpoint: &str, limit: i64) -> Result<Vec<ScalingEvent>> {
        let mut events: Vec<ScalingEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.endpoint == endpoint)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.ts.cmp(&a.ts));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Fully in-memory dependency set. Construct one per test; keep handles to
/// the pieces you want to inspect.
pub struct TestDependencies {
    pub kernel: Arc<ControlKernel>,
    pub provider: MemoryProvider,
    pub events: Arc<InMemoryScalingEventStore>,
}

impl TestDependencies {
    pub fn new() -> Self {
        let provider = MemoryProvider::new();
        let events = Arc::new(InMemoryScalingEventStore::new());
        let kernel = Arc::new(ControlKernel::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryWorkerRegistry::new()),
            Arc::new(InMemoryEndpointStore::new()),
            Arc::new(InMemoryRecipeStore::new()),
            Arc::clone(&events) as Arc<dyn ScalingEventStore>,
            Arc::new(MemoryKv::new()),
            Arc::new(provider.clone()),
        ));
        Self {
            kernel,
            provider,
            events,
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(task_id: &str) -> NewTask {
        NewTask {
            task_id: task_id.to_string(),
            endpoint: "e".to_string(),
            input: None,
        }
    }

    #[tokio::test]
    async fn status_cas_is_a_noop_when_row_moved() {
        let store = InMemoryTaskStore::new();
        store.create(new_task("t1")).await.unwrap();

        assert!(store
            .update_status("t1", TaskStatus::Pending, TaskStatus::Cancelled)
            .await
            .unwrap());
        // The row already moved; the stale CAS must not fire.
        assert!(!store
            .update_status("t1", TaskStatus::Pending, TaskStatus::Cancelled)
            .await
            .unwrap());

        let task = store.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn assignment_is_fifo_and_exclusive() {
        let store = InMemoryTaskStore::new();
        for i in 1..=4 {
            store.create(new_task(&format!("t{i}"))).await.unwrap();
        }

        let first = store.assign_pending("e", 2, "wA").await.unwrap();
        let second = store.assign_pending("e", 10, "wB").await.unwrap();

        let ids = |tasks: &[Task]| -> Vec<String> {
            tasks.iter().map(|t| t.task_id.clone()).collect()
        };
        assert_eq!(ids(&first), vec!["t1", "t2"]);
        assert_eq!(ids(&second), vec!["t3", "t4"]);

        // Nothing left: repeated calls return empty with no side effects.
        assert!(store.assign_pending("e", 10, "wA").await.unwrap().is_empty());
        assert_eq!(store.count("e", TaskStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_task_id_is_a_conflict() {
        let store = InMemoryTaskStore::new();
        store.create(new_task("t1")).await.unwrap();
        assert!(matches!(
            store.create(new_task("t1")).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn worker_counter_never_goes_negative() {
        let registry = InMemoryWorkerRegistry::new();
        registry.upsert_ready("w1", "e").await.unwrap();

        registry.complete("w1", "ghost").await.unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_jobs, 0);
    }

    #[tokio::test]
    async fn assign_to_draining_worker_fails() {
        let registry = InMemoryWorkerRegistry::new();
        registry.upsert_ready("w1", "e").await.unwrap();
        registry.mark_draining("w1").await.unwrap();

        let result = registry.assign("w1", &["t1".to_string()]).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn jobs_in_progress_tracks_counter() {
        let registry = InMemoryWorkerRegistry::new();
        registry.upsert_ready("w1", "e").await.unwrap();

        registry
            .assign("w1", &["t1".to_string(), "t2".to_string()])
            .await
            .unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_jobs, 2);
        assert_eq!(worker.jobs_in_progress.0.len(), 2);
        assert_eq!(worker.status, WorkerStatus::Busy);

        registry.complete("w1", "t1").await.unwrap();
        registry.complete("w1", "t2").await.unwrap();
        let worker = registry.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_jobs, 0);
        assert!(worker.jobs_in_progress.0.is_empty());
        assert_eq!(worker.status, WorkerStatus::Online);
        assert!(worker.last_task_time.is_some());
    }

    #[tokio::test]
    async fn oldest_idle_prefers_never_used_workers() {
        let registry = InMemoryWorkerRegistry::new();
        registry.upsert_ready("wA", "e").await.unwrap();
        registry.upsert_ready("wB", "e").await.unwrap();

        // wB ran something; wA never did, so wA counts as oldest.
        registry.assign("wB", &["t1".to_string()]).await.unwrap();
        registry.complete("wB", "t1").await.unwrap();

        let idle = registry.oldest_idle("e").await.unwrap().unwrap();
        assert_eq!(idle.worker_id, "wA");
    }
}
