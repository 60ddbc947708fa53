//! Database access layer for PostgreSQL.
//!
//! Persistence is optional: without a `DATABASE_URL` the system runs purely
//! in memory and order groups do not survive a restart.

pub mod groups;

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;

pub use groups::OrderGroupRepository;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Run database migrations from the migrations directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(Path::new("./migrations"))
        .await
        .map_err(sqlx::Error::from)?;
    migrator.run(pool).await.map_err(sqlx::Error::from)?;
    Ok(())
}
