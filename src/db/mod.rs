use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;

use crate::config::Config;

pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/// Applies the SQL files under `dir` that have not run yet.
pub async fn run_migrations(pool: &PgPool, dir: &Path) -> anyhow::Result<()> {
    let migrator = Migrator::new(dir).await?;
    migrator.run(pool).await?;
    tracing::info!(dir = %dir.display(), "Database migrations completed");
    Ok(())
}
