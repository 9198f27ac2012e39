//! Worker registry: heartbeats, assignment counters, drain/offline state.
//!
//! Counter updates are single-statement read-modify-writes so they stay
//! atomic under concurrent pulls and submits. `current_jobs` never goes
//! negative; `assign` fails on a DRAINING or OFFLINE worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{Error, Result};

use super::model::Worker;

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Create the record for a pod observed ready, or refresh its heartbeat
    /// if it already exists. An OFFLINE record whose pod reappears comes
    /// back ONLINE.
    async fn upsert_ready(&self, worker_id: &str, endpoint: &str) -> Result<Worker>;

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>>;

    async fn heartbeat(&self, worker_id: &str) -> Result<()>;

    /// Bind freshly assigned tasks: bumps `current_jobs`, unions
    /// `jobs_in_progress`, flips ONLINE to BUSY. `Err(Conflict)` when the
    /// worker is DRAINING or OFFLINE.
    async fn assign(&self, worker_id: &str, task_ids: &[String]) -> Result<()>;

    /// Release one finished task: decrements the counter, removes the id,
    /// stamps `last_task_time`, flips BUSY back to ONLINE when drained.
    async fn complete(&self, worker_id: &str, task_id: &str) -> Result<()>;

    async fn mark_draining(&self, worker_id: &str) -> Result<()>;

    /// Restore a DRAINING worker to service after an aborted scale-down.
    async fn resume(&self, worker_id: &str) -> Result<()>;

    /// Heartbeat timed out: OFFLINE, counters zeroed.
    async fn mark_offline(&self, worker_id: &str) -> Result<()>;

    async fn list_by_endpoint(&self, endpoint: &str) -> Result<Vec<Worker>>;

    /// The idle worker with the smallest `last_task_time` (never-used
    /// treated as oldest), or None.
    async fn oldest_idle(&self, endpoint: &str) -> Result<Option<Worker>>;

    /// Workers whose heartbeat predates `cutoff` and are not yet OFFLINE.
    async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>>;

    /// Drop OFFLINE records untouched since `cutoff`.
    async fn delete_offline_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresWorkerRegistry {
    pool: PgPool,
}

impl PostgresWorkerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRegistry for PostgresWorkerRegistry {
    async fn upsert_ready(&self, worker_id: &str, endpoint: &str) -> Result<Worker> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            INSERT INTO workers (worker_id, endpoint, status)
            VALUES ($1, $2, 'ONLINE')
            ON CONFLICT (worker_id) DO UPDATE SET
                last_heartbeat = NOW(),
                status = CASE WHEN workers.status = 'OFFLINE' THEN 'ONLINE' ELSE workers.status END,
                updated_at = NOW()
            RETURNING worker_id, endpoint, status, current_jobs, jobs_in_progress,
                      last_heartbeat, last_task_time, pod_ready_at, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await?;

        Ok(worker)
    }

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            SELECT worker_id, endpoint, status, current_jobs, jobs_in_progress,
                   last_heartbeat, last_task_time, pod_ready_at, created_at, updated_at
            FROM workers
            WHERE worker_id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(worker)
    }

    async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        sqlx::query("UPDATE workers SET last_heartbeat = NOW(), updated_at = NOW() WHERE worker_id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assign(&self, worker_id: &str, task_ids: &[String]) -> Result<()> {
        let ids = serde_json::to_value(task_ids)?;
        let result = sqlx::query(
            r#"
            UPDATE workers
            SET current_jobs = current_jobs + $2,
                jobs_in_progress = jobs_in_progress || $3::jsonb,
                status = 'BUSY',
                updated_at = NOW()
            WHERE worker_id = $1 AND status IN ('ONLINE', 'BUSY')
            "#,
        )
        .bind(worker_id)
        .bind(task_ids.len() as i32)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "worker {worker_id} is draining or offline"
            )));
        }
        Ok(())
    }

    async fn complete(&self, worker_id: &str, task_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET current_jobs = GREATEST(current_jobs - 1, 0),
                jobs_in_progress = jobs_in_progress - $2,
                status = CASE
                    WHEN current_jobs <= 1 AND status = 'BUSY' THEN 'ONLINE'
                    ELSE status
                END,
                last_task_time = NOW(),
                updated_at = NOW()
            WHERE worker_id = $1
            "#,
        )
        .bind(worker_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_draining(&self, worker_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workers SET status = 'DRAINING', updated_at = NOW() WHERE worker_id = $1",
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resume(&self, worker_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET status = CASE WHEN current_jobs > 0 THEN 'BUSY' ELSE 'ONLINE' END,
                updated_at = NOW()
            WHERE worker_id = $1 AND status = 'DRAINING'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET status = 'OFFLINE',
                current_jobs = 0,
                jobs_in_progress = '[]'::jsonb,
                updated_at = NOW()
            WHERE worker_id = $1
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_endpoint(&self, endpoint: &str) -> Result<Vec<Worker>> {
        let workers = sqlx::query_as::<_, Worker>(
            r#"
            SELECT worker_id, endpoint, status, current_jobs, jobs_in_progress,
                   last_heartbeat, last_task_time, pod_ready_at, created_at, updated_at
            FROM workers
            WHERE endpoint = $1
            ORDER BY worker_id
            "#,
        )
        .bind(endpoint)
        .fetch_all(&self.pool)
        .await?;

        Ok(workers)
    }

    async fn oldest_idle(&self, endpoint: &str) -> Result<Option<Worker>> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            SELECT worker_id, endpoint, status, current_jobs, jobs_in_progress,
                   last_heartbeat, last_task_time, pod_ready_at, created_at, updated_at
            FROM workers
            WHERE endpoint = $1 AND current_jobs = 0 AND status = 'ONLINE'
            ORDER BY last_task_time ASC NULLS FIRST
            LIMIT 1
            "#,
        )
        .bind(endpoint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(worker)
    }

    async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>> {
        let workers = sqlx::query_as::<_, Worker>(
            r#"
            SELECT worker_id, endpoint, status, current_jobs, jobs_in_progress,
                   last_heartbeat, last_task_time, pod_ready_at, created_at, updated_at
            FROM workers
            WHERE last_heartbeat < $1 AND status != 'OFFLINE'
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(workers)
    }

    async fn delete_offline_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM workers WHERE status = 'OFFLINE' AND updated_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
