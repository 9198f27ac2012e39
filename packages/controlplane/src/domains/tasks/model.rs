//! Task model for client-submitted work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }
}

/// Result a worker reports for a finished task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Option<serde_json::Value>),
    Failed(Option<String>),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }
}

// ============================================================================
// Execution history
// ============================================================================

/// One assignment of a task to a worker. Appended on every assignment,
/// closed on requeue, timeout, or completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub worker_id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ExecutionRecord {
    pub fn open(worker_id: &str, start: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            start,
            end: None,
            duration_ms: None,
        }
    }

    pub fn close(&mut self, end: DateTime<Utc>) {
        self.duration_ms = Some((end - self.start).num_milliseconds());
        self.end = Some(end);
    }
}

// ============================================================================
// Task model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Monotonic assignment-ordering key (FIFO within an endpoint).
    pub id: i64,
    pub task_id: String,
    pub endpoint: String,
    pub status: TaskStatus,
    /// Non-empty iff status is IN_PROGRESS.
    pub worker_id: Option<String>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_history: Json<Vec<ExecutionRecord>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.execution_history.0
    }

    /// The worker of the most recent assignment, terminal or not.
    pub fn last_execution_worker(&self) -> Option<&str> {
        self.executions().last().map(|e| e.worker_id.as_str())
    }
}

/// Fields a client supplies when submitting a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_id: String,
    pub endpoint: String,
    pub input: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_not_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn completed_failed_cancelled_timeout_are_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
    }

    #[test]
    fn status_serializes_in_wire_form() {
        let s = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(s, "\"IN_PROGRESS\"");
    }

    #[test]
    fn closing_an_execution_sets_duration() {
        let start = Utc::now();
        let mut rec = ExecutionRecord::open("w1", start);
        rec.close(start + chrono::Duration::milliseconds(1500));
        assert_eq!(rec.duration_ms, Some(1500));
        assert!(rec.end.is_some());
    }
}
