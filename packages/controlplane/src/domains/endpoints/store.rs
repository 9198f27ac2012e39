//! Endpoint-config and resource-recipe stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::common::{Error, Result};

use super::model::{Endpoint, EndpointHealth, EndpointLifecycle, ResourceRecipe};

#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Insert or fully replace an endpoint config (bookkeeping fields kept).
    async fn upsert(&self, endpoint: Endpoint) -> Result<Endpoint>;

    async fn get(&self, name: &str) -> Result<Endpoint>;

    async fn list(&self) -> Result<Vec<Endpoint>>;

    /// Record what was just asked of the deployment controller;
    /// `stamp_scale_time` also bumps `last_scale_time` (cooldown anchor).
    async fn set_replicas_desired(
        &self,
        name: &str,
        replicas: i32,
        stamp_scale_time: bool,
    ) -> Result<()>;

    /// Stamp or clear the starvation watermark.
    async fn set_first_pending(&self, name: &str, ts: Option<DateTime<Utc>>) -> Result<()>;

    async fn touch_last_task(&self, name: &str) -> Result<()>;

    async fn set_health(&self, name: &str, health: EndpointHealth) -> Result<()>;

    async fn set_lifecycle(&self, name: &str, lifecycle: EndpointLifecycle) -> Result<()>;
}

#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<ResourceRecipe>;

    async fn upsert(&self, recipe: ResourceRecipe) -> Result<()>;
}

// ============================================================================
// Postgres implementations
// ============================================================================

const ENDPOINT_COLUMNS: &str = r#"name, spec_name, min_replicas, max_replicas, replicas_desired,
    priority, concurrency, task_timeout_secs, scale_up_threshold, scale_down_idle_secs,
    scale_up_cooldown_secs, scale_down_cooldown_secs, enable_dynamic_prio, high_load_threshold,
    priority_boost, autoscaler_enabled, health, lifecycle, first_pending_time, last_scale_time,
    last_task_time, created_at, updated_at"#;

pub struct PostgresEndpointStore {
    pool: PgPool,
}

impl PostgresEndpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EndpointStore for PostgresEndpointStore {
    async fn upsert(&self, endpoint: Endpoint) -> Result<Endpoint> {
        let sql = format!(
            r#"
            INSERT INTO autoscaler_configs
                (name, spec_name, min_replicas, max_replicas, replicas_desired, priority,
                 concurrency, task_timeout_secs, scale_up_threshold, scale_down_idle_secs,
                 scale_up_cooldown_secs, scale_down_cooldown_secs, enable_dynamic_prio,
                 high_load_threshold, priority_boost, autoscaler_enabled, health, lifecycle)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (name) DO UPDATE SET
                spec_name = EXCLUDED.spec_name,
                min_replicas = EXCLUDED.min_replicas,
                max_replicas = EXCLUDED.max_replicas,
                priority = EXCLUDED.priority,
                concurrency = EXCLUDED.concurrency,
                task_timeout_secs = EXCLUDED.task_timeout_secs,
                scale_up_threshold = EXCLUDED.scale_up_threshold,
                scale_down_idle_secs = EXCLUDED.scale_down_idle_secs,
                scale_up_cooldown_secs = EXCLUDED.scale_up_cooldown_secs,
                scale_down_cooldown_secs = EXCLUDED.scale_down_cooldown_secs,
                enable_dynamic_prio = EXCLUDED.enable_dynamic_prio,
                high_load_threshold = EXCLUDED.high_load_threshold,
                priority_boost = EXCLUDED.priority_boost,
                autoscaler_enabled = EXCLUDED.autoscaler_enabled,
                health = EXCLUDED.health,
                lifecycle = EXCLUDED.lifecycle,
                updated_at = NOW()
            RETURNING {ENDPOINT_COLUMNS}
            "#
        );

        let endpoint_row = sqlx::query_as::<_, Endpoint>(&sql)
            .bind(&endpoint.name)
            .bind(&endpoint.spec_name)
            .bind(endpoint.min_replicas)
            .bind(endpoint.max_replicas)
            .bind(endpoint.replicas_desired)
            .bind(endpoint.priority)
            .bind(endpoint.concurrency)
            .bind(endpoint.task_timeout_secs)
            .bind(endpoint.scale_up_threshold)
            .bind(endpoint.scale_down_idle_secs)
            .bind(endpoint.scale_up_cooldown_secs)
            .bind(endpoint.scale_down_cooldown_secs)
            .bind(endpoint.enable_dynamic_prio)
            .bind(endpoint.high_load_threshold)
            .bind(endpoint.priority_boost)
            .bind(endpoint.autoscaler_enabled)
            .bind(endpoint.health)
            .bind(endpoint.lifecycle)
            .fetch_one(&self.pool)
            .await?;

        Ok(endpoint_row)
    }

    async fn get(&self, name: &str) -> Result<Endpoint> {
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM autoscaler_configs WHERE name = $1");
        let endpoint = sqlx::query_as::<_, Endpoint>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        endpoint.ok_or_else(|| Error::NotFound(format!("endpoint {name}")))
    }

    async fn list(&self) -> Result<Vec<Endpoint>> {
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM autoscaler_configs ORDER BY name");
        let endpoints = sqlx::query_as::<_, Endpoint>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(endpoints)
    }

    async fn set_replicas_desired(
        &self,
        name: &str,
        replicas: i32,
        stamp_scale_time: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE autoscaler_configs
            SET replicas_desired = $2,
                last_scale_time = CASE WHEN $3 THEN NOW() ELSE last_scale_time END,
                updated_at = NOW()
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(replicas)
        .bind(stamp_scale_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_first_pending(&self, name: &str, ts: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query(
            "UPDATE autoscaler_configs SET first_pending_time = $2, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(ts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_last_task(&self, name: &str) -> Result<()> {
        sqlx::query(
            "UPDATE autoscaler_configs SET last_task_time = NOW(), updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_health(&self, name: &str, health: EndpointHealth) -> Result<()> {
        sqlx::query("UPDATE autoscaler_configs SET health = $2, updated_at = NOW() WHERE name = $1")
            .bind(name)
            .bind(health)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_lifecycle(&self, name: &str, lifecycle: EndpointLifecycle) -> Result<()> {
        sqlx::query(
            "UPDATE autoscaler_configs SET lifecycle = $2, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(lifecycle)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PostgresRecipeStore {
    pool: PgPool,
}

impl PostgresRecipeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipeStore for PostgresRecipeStore {
    async fn get(&self, name: &str) -> Result<ResourceRecipe> {
        let recipe = sqlx::query_as::<_, ResourceRecipe>(
            "SELECT name, gpu_count, cpu_cores, memory FROM specs WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        recipe.ok_or_else(|| Error::NotFound(format!("spec {name}")))
    }

    async fn upsert(&self, recipe: ResourceRecipe) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO specs (name, gpu_count, cpu_cores, memory)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                gpu_count = EXCLUDED.gpu_count,
                cpu_cores = EXCLUDED.cpu_cores,
                memory = EXCLUDED.memory
            "#,
        )
        .bind(&recipe.name)
        .bind(recipe.gpu_count)
        .bind(&recipe.cpu_cores)
        .bind(&recipe.memory)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
