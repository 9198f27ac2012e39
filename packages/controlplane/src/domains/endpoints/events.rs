//! Scaling-event audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Preempted,
    Blocked,
    ScaleDownBlocked,
    ScaleDownAborted,
    OrphanFixed,
    ScaleUpBlockedImageFailure,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub event_id: Uuid,
    pub endpoint: String,
    pub ts: DateTime<Utc>,
    pub action: ScalingAction,
    pub from_replicas: i32,
    pub to_replicas: i32,
    pub reason: String,
    pub queue_length: i64,
    pub priority: i64,
    pub preempted_from: Json<Vec<String>>,
}

impl ScalingEvent {
    pub fn new(endpoint: &str, action: ScalingAction, from: i32, to: i32, reason: &str) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            ts: Utc::now(),
            action,
            from_replicas: from,
            to_replicas: to,
            reason: reason.to_string(),
            queue_length: 0,
            priority: 0,
            preempted_from: Json(vec![]),
        }
    }

    pub fn with_queue(mut self, queue_length: i64) -> Self {
        self.queue_length = queue_length;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preempted_from(mut self, victims: Vec<String>) -> Self {
        self.preempted_from = Json(victims);
        self
    }
}

#[async_trait]
pub trait ScalingEventStore: Send + Sync {
    async fn append(&self, event: ScalingEvent) -> Result<()>;

    /// Timestamp of the most recent event of `action` for `endpoint`, used
    /// by the blocked-event rate limit.
    async fn last_event_time(
        &self,
        endpoint: &str,
        action: ScalingAction,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn recent(&self, endpoint: &str, limit: i64) -> Result<Vec<ScalingEvent>>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresScalingEventStore {
    pool: PgPool,
}

impl PostgresScalingEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScalingEventStore for PostgresScalingEventStore {
    async fn append(&self, event: ScalingEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scaling_events
                (event_id, endpoint, ts, action, from_replicas, to_replicas,
                 reason, queue_length, priority, preempted_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.endpoint)
        .bind(event.ts)
        .bind(event.action)
        .bind(event.from_replicas)
        .bind(event.to_replicas)
        .bind(&event.reason)
        .bind(event.queue_length)
        .bind(event.priority)
        .bind(&event.preempted_from)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_event_time(
        &self,
        endpoint: &str,
        action: ScalingAction,
    ) -> Result<Option<DateTime<Utc>>> {
        let ts = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT ts FROM scaling_events
            WHERE endpoint = $1 AND action = $2
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(endpoint)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ts)
    }

    async fn recent(&self, endpoint: &str, limit: i64) -> Result<Vec<ScalingEvent>> {
        let events = sqlx::query_as::<_, ScalingEvent>(
            r#"
            SELECT event_id, endpoint, ts, action, from_replicas, to_replicas,
                   reason, queue_length, priority, preempted_from
            FROM scaling_events
            WHERE endpoint = $1
            ORDER BY ts DESC
            LIMIT $2
            "#,
        )
        .bind(endpoint)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
