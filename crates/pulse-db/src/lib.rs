//! Persistence gateway for SentimentPulse.
//!
//! [`HarvestStore`] is the idempotent upsert/read/delete contract used by the
//! orchestrator. [`PgStore`] implements it on Postgres; [`MemoryStore`]
//! implements it in-process for tests and one-off runs.

use std::time::Duration;

use pulse_core::AppConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

pub mod analyses;
pub mod jobs;
pub mod keys;
pub mod memory;
pub mod posts;
pub mod records;
pub mod store;

pub use keys::{content_signature, record_key};
pub use memory::MemoryStore;
pub use store::{HarvestStore, PgStore, StoredAnalysis};

// Relative to this crate's manifest: <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections.min(config.db_max_connections),
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    #[error("job {job_id}: {field} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        job_id: uuid::Uuid,
        field: String,
        from: String,
        to: String,
    },
    #[error("stored document is malformed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("stored value is malformed: {0}")]
    Decode(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Open a Postgres pool.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if no connection can be established within the
/// acquire timeout.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Open a pool from application config and wrap it in a [`PgStore`].
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] for a blank URL, or
/// [`DbError::Sqlx`] if the connection fails.
pub async fn connect_store(config: &AppConfig) -> Result<PgStore, DbError> {
    if config.database_url.trim().is_empty() {
        return Err(DbError::MissingDatabaseUrl);
    }
    let pool = connect_pool(&config.database_url, PoolConfig::from_app_config(config)).await?;
    tracing::debug!(
        max_connections = config.db_max_connections,
        "postgres pool connected"
    );
    Ok(PgStore::new(pool))
}

/// Apply pending migrations. Returns how many were newly applied.
///
/// # Errors
///
/// Returns [`DbError::Migration`] if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, DbError> {
    let before = applied_migrations(pool).await;
    MIGRATOR.run(pool).await?;
    let after = applied_migrations(pool).await;
    let applied = after.saturating_sub(before);
    tracing::info!(applied, total = after, "migrations up to date");
    Ok(applied)
}

/// Successful migrations recorded so far; a fresh database has none.
async fn applied_migrations(pool: &PgPool) -> usize {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

/// Round-trip a trivial query.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Counts are stored in `INTEGER` columns; saturate rather than wrap.
pub(crate) fn to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_keeps_one_warm_connection() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert!(config.max_connections >= config.min_connections);
    }

    #[test]
    fn to_i32_saturates() {
        assert_eq!(to_i32(5), 5);
        assert_eq!(to_i32(usize::MAX), i32::MAX);
    }
}
