//! CLI for running database migrations standalone.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "migrate_cli")]
#[command(about = "Database migration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Run,

    /// Show applied migration versions
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPool::connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Run => {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            println!("migrations applied");
        }
        Commands::Info => {
            let rows = sqlx::query_as::<_, (i64, String)>(
                "SELECT version, description FROM _sqlx_migrations ORDER BY version",
            )
            .fetch_all(&pool)
            .await
            .context("Failed to read migration history")?;
            for (version, description) in rows {
                println!("{version} {description}");
            }
        }
    }

    Ok(())
}
