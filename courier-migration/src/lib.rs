//! Versioned schema migrations for courier storage backends.
//!
//! Each backend implements [`MigrationManager`] for its database and ships one
//! [`Migration`] per schema change. Applied versions are tracked in a table
//! named by [`MigrationManager::get_migration_table_name`].
use async_trait::async_trait;
use courier_core::{Error, StorageError};
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<MigrationError> for Error {
    fn from(error: MigrationError) -> Self {
        Error::Storage(StorageError::Migration(error.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Apply the schema change inside the caller's connection.
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Applied in ascending order; must be unique within a backend.
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix milliseconds, like every other timestamp courier stores.
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_courier_migrations"
    }

    /// Create the tracking table if it does not exist yet.
    async fn initialize(&self) -> Result<()>;

    /// Apply every migration in `migrations` that is not recorded, in version order.
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Revert recorded migrations, newest first.
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;

    /// Versions from `migrations` that have not been applied yet, in ascending order
    async fn pending_versions(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<Vec<i64>> {
        let applied: Vec<i64> = self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|record| record.version)
            .collect();

        let mut pending: Vec<i64> = migrations
            .iter()
            .map(|migration| migration.version())
            .filter(|version| !applied.contains(version))
            .collect();
        pending.sort_unstable();
        Ok(pending)
    }
}
