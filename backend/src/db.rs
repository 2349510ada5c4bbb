//! Database pool and migrations
//!
//! Migrations run only through [`migrate`], called once by the operator
//! (`weldstock migrate`), never as a side effect of opening a store.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Create the connection pool
pub async fn connect(config: &DatabaseConfig) -> AppResult<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await?;
    tracing::info!("Database connection established");
    Ok(pool)
}

/// Apply pending schema migrations
pub async fn migrate(pool: &PgPool) -> AppResult<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("migration failed: {}", e)))?;
    tracing::info!("Migrations completed");
    Ok(())
}
