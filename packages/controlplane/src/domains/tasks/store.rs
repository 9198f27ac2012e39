//! Task store: atomic state transitions over Postgres.
//!
//! The claim query follows the same CTE + `FOR UPDATE SKIP LOCKED` shape as
//! every other claim path in this codebase: contended rows are skipped, so
//! concurrent pulls each get a disjoint batch and nobody blocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{Error, Result};

use super::model::{NewTask, Task, TaskOutcome, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new PENDING task.
    async fn create(&self, task: NewTask) -> Result<Task>;

    async fn get(&self, task_id: &str) -> Result<Task>;

    /// Compare-and-swap on the current status. Returns false (a no-op) if
    /// the row has already moved.
    async fn update_status(&self, task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool>;

    /// Atomically claim up to `limit` PENDING tasks for `endpoint` in FIFO
    /// order and bind them to `worker_id`. The only assignment path out of
    /// PENDING. Returns fewer tasks when other transactions hold row locks.
    async fn assign_pending(&self, endpoint: &str, limit: i64, worker_id: &str)
        -> Result<Vec<Task>>;

    /// Terminal transition reported by the owning worker. Closes the open
    /// execution record. `Err(Conflict)` when the task is not IN_PROGRESS
    /// with this worker.
    async fn complete(&self, task_id: &str, worker_id: &str, outcome: &TaskOutcome)
        -> Result<Task>;

    /// Store intermediate output for a task still IN_PROGRESS with this
    /// worker.
    async fn store_partial_output(
        &self,
        task_id: &str,
        worker_id: &str,
        output: serde_json::Value,
    ) -> Result<()>;

    /// IN_PROGRESS tasks bound to a worker.
    async fn tasks_by_worker(&self, worker_id: &str) -> Result<Vec<Task>>;

    /// All IN_PROGRESS tasks (orphan sweep input).
    async fn in_progress(&self) -> Result<Vec<Task>>;

    async fn count(&self, endpoint: &str, status: TaskStatus) -> Result<i64>;

    async fn list(&self, endpoint: &str, task_id: Option<&str>, limit: i64) -> Result<Vec<Task>>;

    /// Return an IN_PROGRESS task to PENDING (orphan recovery): clears the
    /// worker binding and closes the open execution record.
    async fn requeue(&self, task_id: &str) -> Result<bool>;

    /// IN_PROGRESS past its deadline becomes TIMEOUT.
    async fn mark_timed_out(&self, task_id: &str) -> Result<bool>;

    /// Delete up to `limit` terminal tasks completed before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a row under `FOR UPDATE` inside an open transaction.
    async fn lock_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        task_id: &str,
    ) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, task_id, endpoint, status, worker_id, input, output, error,
                   started_at, completed_at, execution_history, created_at, updated_at
            FROM tasks
            WHERE task_id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(task)
    }

    /// Write back status, worker binding, result fields, and history.
    async fn write_transition(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        task: &Task,
    ) -> Result<Task> {
        let updated = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = $1, worker_id = $2, output = $3, error = $4,
                completed_at = $5, execution_history = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING id, task_id, endpoint, status, worker_id, input, output, error,
                      started_at, completed_at, execution_history, created_at, updated_at
            "#,
        )
        .bind(task.status)
        .bind(&task.worker_id)
        .bind(&task.output)
        .bind(&task.error)
        .bind(task.completed_at)
        .bind(&task.execution_history)
        .bind(task.id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(updated)
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let created = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (task_id, endpoint, status, input)
            VALUES ($1, $2, 'PENDING', $3)
            RETURNING id, task_id, endpoint, status, worker_id, input, output, error,
                      started_at, completed_at, execution_history, created_at, updated_at
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.endpoint)
        .bind(&task.input)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, task_id, endpoint, status, worker_id, input, output, error,
                   started_at, completed_at, execution_history, created_at, updated_at
            FROM tasks
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        task.ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    async fn update_status(&self, task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE task_id = $1 AND status = $2
            "#,
        )
        .bind(task_id)
        .bind(from)
        .bind(to)
        .bind(to.is_terminal())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_pending(
        &self,
        endpoint: &str,
        limit: i64,
        worker_id: &str,
    ) -> Result<Vec<Task>> {
        let mut tasks = sqlx::query_as::<_, Task>(
            r#"
            WITH next_tasks AS (
                SELECT id
                FROM tasks
                WHERE endpoint = $1 AND status = 'PENDING'
                ORDER BY id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET status = 'IN_PROGRESS',
                worker_id = $3,
                started_at = COALESCE(started_at, NOW()),
                execution_history = execution_history || jsonb_build_array(jsonb_build_object(
                    'worker_id', $3::text,
                    'start', NOW(),
                    'end', NULL,
                    'duration_ms', NULL
                )),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_tasks)
            RETURNING id, task_id, endpoint, status, worker_id, input, output, error,
                      started_at, completed_at, execution_history, created_at, updated_at
            "#,
        )
        .bind(endpoint)
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;

        let Some(mut task) = Self::lock_row(&mut tx, task_id).await? else {
            return Err(Error::NotFound(format!("task {task_id}")));
        };

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

        let updated = Self::write_transition(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn store_partial_output(
        &self,
        task_id: &str,
        worker_id: &str,
        output: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET output = $3, updated_at = NOW()
            WHERE task_id = $1 AND worker_id = $2 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(output)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "task {task_id} is not in progress with worker {worker_id}"
            )));
        }
        Ok(())
    }

    async fn tasks_by_worker(&self, worker_id: &str) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, task_id, endpoint, status, worker_id, input, output, error,
                   started_at, completed_at, execution_history, created_at, updated_at
            FROM tasks
            WHERE worker_id = $1 AND status = 'IN_PROGRESS'
            ORDER BY id ASC
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn in_progress(&self) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, task_id, endpoint, status, worker_id, input, output, error,
                   started_at, completed_at, execution_history, created_at, updated_at
            FROM tasks
            WHERE status = 'IN_PROGRESS'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn count(&self, endpoint: &str, status: TaskStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tasks WHERE endpoint = $1 AND status = $2",
        )
        .bind(endpoint)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list(&self, endpoint: &str, task_id: Option<&str>, limit: i64) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, task_id, endpoint, status, worker_id, input, output, error,
                   started_at, completed_at, execution_history, created_at, updated_at
            FROM tasks
            WHERE endpoint = $1 AND ($2::text IS NULL OR task_id = $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(endpoint)
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn requeue(&self, task_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut task) = Self::lock_row(&mut tx, task_id).await? else {
            return Ok(false);
        };
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

        Self::write_transition(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_timed_out(&self, task_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let Some(mut task) = Self::lock_row(&mut tx, task_id).await? else {
            return Ok(false);
        };
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

        Self::write_transition(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE id IN (
                SELECT id FROM tasks
                WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED', 'TIMEOUT')
                  AND completed_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
