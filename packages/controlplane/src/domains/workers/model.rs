use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    #[default]
    Online,
    Busy,
    /// Finishing current tasks; refuses new assignments.
    Draining,
    Offline,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Pod name.
    pub worker_id: String,
    pub endpoint: String,
    pub status: WorkerStatus,
    pub current_jobs: i32,
    pub jobs_in_progress: Json<Vec<String>>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_task_time: Option<DateTime<Utc>>,
    pub pod_ready_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    pub fn is_idle(&self) -> bool {
        self.current_jobs == 0
    }

    /// Whether new assignments may be bound to this worker.
    pub fn accepts_work(&self) -> bool {
        matches!(self.status, WorkerStatus::Online | WorkerStatus::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_worker() -> Worker {
        Worker {
            worker_id: "pod-a".to_string(),
            endpoint: "e".to_string(),
            status: WorkerStatus::Online,
            current_jobs: 0,
            jobs_in_progress: Json(vec![]),
            last_heartbeat: Utc::now(),
            last_task_time: None,
            pod_ready_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn worker_with_no_jobs_is_idle() {
        assert!(sample_worker().is_idle());
    }

    #[test]
    fn draining_worker_refuses_work() {
        let mut w = sample_worker();
        w.status = WorkerStatus::Draining;
        assert!(!w.accepts_work());
        w.status = WorkerStatus::Offline;
        assert!(!w.accepts_work());
    }

    #[test]
    fn online_and_busy_workers_accept_work() {
        let mut w = sample_worker();
        assert!(w.accepts_work());
        w.status = WorkerStatus::Busy;
        assert!(w.accepts_work());
    }
}
