use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Optional: without it the control plane runs in single-instance mode
    /// (process-local locks, in-memory global config).
    pub redis_url: Option<String>,
    pub port: u16,
    /// Shared token workers present on every job-protocol request.
    pub worker_token: String,
    /// Terminal tasks older than this many days are deleted by retention.
    pub task_retention_days: i64,
    /// Bound on the asynchronous drain verification before a scale-down is
    /// confirmed anyway.
    pub drain_max_wait_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_token: env::var("WORKER_TOKEN").context("WORKER_TOKEN must be set")?,
            task_retention_days: env::var("TASK_RETENTION_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .context("TASK_RETENTION_DAYS must be a valid number")?,
            drain_max_wait_secs: env::var("DRAIN_MAX_WAIT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("DRAIN_MAX_WAIT_SECS must be a valid number")?,
        })
    }
}
