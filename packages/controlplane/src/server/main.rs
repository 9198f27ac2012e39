// Main entry point for the control-plane server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use controlplane_core::autoscaler::{AutoscalerManager, Executor, MemoryProvider};
use controlplane_core::kernel::{ControlKernel, KvStore, MemoryKv, RedisKv};
use controlplane_core::reconcile::start_reconcilers;
use controlplane_core::server::{build_app, AppState};
use controlplane_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,controlplane_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting serverless control plane");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // KV store: Redis when configured, otherwise single-instance mode.
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => match RedisKv::connect(url).await {
            Ok(kv) => {
                tracing::info!("Redis connected");
                Arc::new(kv)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unreachable, running single-instance with in-memory KV");
                Arc::new(MemoryKv::new())
            }
        },
        None => {
            tracing::warn!("REDIS_URL not set, running single-instance with in-memory KV");
            Arc::new(MemoryKv::new())
        }
    };

    // Deployment provider. The in-process provider serves standalone
    // deployments; orchestrator integrations implement DeploymentProvider.
    let provider = Arc::new(MemoryProvider::new());

    let kernel = Arc::new(ControlKernel::postgres(pool.clone(), kv, provider));

    // Process-wide shutdown
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    // Autoscaler control loop
    let executor = Executor::new(Arc::clone(&kernel), shutdown.clone()).with_drain_timing(
        Duration::from_secs(config.drain_max_wait_secs),
        Duration::from_secs(2),
    );
    let manager = AutoscalerManager::with_executor(Arc::clone(&kernel), shutdown.clone(), executor)
        .await
        .context("Failed to build autoscaler manager")?;
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                tracing::error!(error = %e, "autoscaler loop exited with error");
            }
        });
    }

    // Periodic reconcilers
    let _scheduler = start_reconcilers(
        Arc::clone(&kernel),
        manager.config(),
        config.task_retention_days,
    )
    .await
    .context("Failed to start reconcilers")?;

    // Build application
    let app = build_app(AppState {
        kernel,
        worker_token: config.worker_token.clone(),
        db_pool: Some(pool),
    });

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await
        .context("Server error")?;

    manager.stop();
    tracing::info!("control plane stopped");
    Ok(())
}
