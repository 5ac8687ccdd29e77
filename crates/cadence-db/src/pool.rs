use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/cadence-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables owned by the scheduler, in dependency order.
pub const TABLES: [&str; 5] = [
    "plans",
    "user_preferences",
    "generation_leases",
    "week_history",
    "notifications",
];

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool sized from the config.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))
}

/// Apply every pending embedded migration.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "database schema is up to date"
    );
    Ok(())
}

/// Create the configured database on its server when it is missing.
///
/// Returns `true` when the database was created by this call.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;
    let stmt = format!("CREATE DATABASE {}", quote_ident(db_name)?);

    let maint_pool = connect_maintenance(config).await?;
    let result = async {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(db_name)
                .fetch_one(&maint_pool)
                .await
                .context("failed to query pg_database")?;
        if exists {
            info!(db = db_name, "database already exists");
            return Ok(false);
        }
        maint_pool
            .execute(stmt.as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
        Ok(true)
    }
    .await;

    maint_pool.close().await;
    result
}

async fn connect_maintenance(config: &DbConfig) -> Result<PgPool> {
    let url = config.maintenance_url();
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {url}"))
}

/// Double-quote an identifier for statements that cannot take a bind
/// parameter.
fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.len() > 63 || name.contains('\0') {
        bail!("invalid database name {name:?}");
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Row counts for the scheduler's tables, printed by `cadence db-init`.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table, count));
    }
    Ok(counts)
}
