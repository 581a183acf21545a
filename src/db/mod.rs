//! Database module providing the SQLite cache connection and queries.

pub mod jobs;
pub mod test_failures;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

/// Handle to the durable job cache.
///
/// A single connection is used: the cache has exactly one writer, and an
/// in-memory SQLite database only exists on the connection that created it.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Open the cache described by the configuration and bring its schema up to date.
    pub async fn new(config: &Config) -> AppResult<Self> {
        if let Some(path) = &config.cache_db
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Database(format!("Failed to create cache directory: {}", e))
            })?;
        }

        let pool = Self::connect(&config.database_url()).await?;
        pool.run_migrations().await?;

        if config.is_ephemeral() {
            info!("Using in-memory job cache (set TRIAGE_CACHE_DB to persist)");
        } else {
            info!("Using job cache at {}", config.database_url());
        }

        Ok(pool)
    }

    /// Open an in-memory cache with the schema applied.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = Self::connect("sqlite::memory:").await?;
        pool.run_migrations().await?;
        Ok(pool)
    }

    async fn connect(url: &str) -> AppResult<Self> {
        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to open cache: {}", e)))?;

        Ok(DbPool { conn })
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(|e| AppError::Database(format!("Failed to run migrations: {}", e)))?;
        Ok(())
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}
