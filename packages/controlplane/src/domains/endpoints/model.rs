//! Endpoint autoscaling config and the resource recipe it points at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

/// Per-endpoint override of the global autoscaler switch. The override wins;
/// `Default` falls back to the global value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AutoscalerOverride {
    Enabled,
    Disabled,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    #[default]
    Ok,
    /// The image cannot be pulled; scale-ups are refused and the deployment
    /// is forced to zero so the orchestrator stops respawning failing pods.
    ImagePullFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndpointLifecycle {
    #[default]
    Running,
    Stopped,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Endpoint {
    pub name: String,
    pub spec_name: String,

    #[builder(default = 0)]
    pub min_replicas: i32,
    #[builder(default = 1)]
    pub max_replicas: i32,
    /// What we last asked the deployment controller for.
    #[builder(default = 0)]
    pub replicas_desired: i32,

    /// Higher = more important.
    #[builder(default = 0)]
    pub priority: i32,
    /// Target parallelism per worker, returned by the heartbeat endpoint.
    #[builder(default = 1)]
    pub concurrency: i32,
    #[builder(default = 3600)]
    pub task_timeout_secs: i64,

    /// Pending count that permits scale-from-zero.
    #[builder(default = 1)]
    pub scale_up_threshold: i64,
    #[builder(default = 300)]
    pub scale_down_idle_secs: i64,
    #[builder(default = 30)]
    pub scale_up_cooldown_secs: i64,
    #[builder(default = 60)]
    pub scale_down_cooldown_secs: i64,

    #[builder(default = true)]
    pub enable_dynamic_prio: bool,
    #[builder(default = 10)]
    pub high_load_threshold: i64,
    #[builder(default = 20)]
    pub priority_boost: i32,

    #[builder(default)]
    pub autoscaler_enabled: AutoscalerOverride,
    #[builder(default)]
    pub health: EndpointHealth,
    #[builder(default)]
    pub lifecycle: EndpointLifecycle,

    /// Watermark set when the queue goes 0 -> >0, cleared on >0 -> 0.
    #[builder(default, setter(strip_option))]
    pub first_pending_time: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_scale_time: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_task_time: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Whether the autoscaler may touch this endpoint, given the global
    /// switch.
    pub fn autoscaling_active(&self, global_enabled: bool) -> bool {
        match self.autoscaler_enabled {
            AutoscalerOverride::Enabled => true,
            AutoscalerOverride::Disabled => false,
            AutoscalerOverride::Default => global_enabled,
        }
    }
}

/// Named resource recipe. The raw cpu/memory strings are parsed by the
/// resource calculator ("4", "4000m", "8Gi", "8GB", "8192Mi").
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecipe {
    pub name: String,
    pub gpu_count: i32,
    pub cpu_cores: String,
    pub memory: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_endpoint() -> Endpoint {
        Endpoint::builder()
            .name("e".to_string())
            .spec_name("small".to_string())
            .build()
    }

    #[test]
    fn builder_applies_documented_defaults() {
        let ep = sample_endpoint();
        assert_eq!(ep.scale_up_threshold, 1);
        assert_eq!(ep.scale_down_idle_secs, 300);
        assert_eq!(ep.scale_up_cooldown_secs, 30);
        assert_eq!(ep.scale_down_cooldown_secs, 60);
        assert!(ep.enable_dynamic_prio);
        assert_eq!(ep.high_load_threshold, 10);
        assert_eq!(ep.priority_boost, 20);
    }

    #[test]
    fn override_beats_global_switch() {
        let mut ep = sample_endpoint();
        ep.autoscaler_enabled = AutoscalerOverride::Enabled;
        assert!(ep.autoscaling_active(false));
        ep.autoscaler_enabled = AutoscalerOverride::Disabled;
        assert!(!ep.autoscaling_active(true));
    }

    #[test]
    fn default_override_follows_global_switch() {
        let ep = sample_endpoint();
        assert!(ep.autoscaling_active(true));
        assert!(!ep.autoscaling_active(false));
    }
}
